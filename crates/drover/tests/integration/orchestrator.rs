/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use crate::fixtures::{fast_worker_config, TestFixture};
use drover::dal::DAL;
use drover::executor::{execute_leased, ExecutionReport};
use drover::orchestrator::{ChildDefinition, FanOutCoordinator, FanOutDefinition, WorkUnit};
use drover::{
    CancelReason, CancellationSignal, GroupState, Job, JobBody, JobError, JobRegistry, JobResult,
    JobRole, JobStatus, NewJob, ProgressReporter, QueueType,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;

fn categories(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Creates a group for `definition` and leases its coordinator.
async fn leased_coordinator(dal: &DAL, definition: &FanOutDefinition) -> Job {
    let engine = drover::JobEngine::from_dal(dal.clone());
    engine.create_group(QueueType::Export, definition).await.unwrap();
    dal.job()
        .dequeue(QueueType::Export, 1, Duration::from_secs(60), "coordinator-worker")
        .await
        .unwrap()
        .remove(0)
}

async fn child_keys(dal: &DAL, group_id: i64) -> Vec<String> {
    dal.job()
        .get_by_group(group_id, false)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.idempotency_key.unwrap())
        .collect()
}

#[tokio::test]
async fn test_basic_fan_out_enqueues_every_unit() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition = FanOutDefinition::parallel(categories(&["A", "B", "C"]), 1, json!({"since": 1}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    let report = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap();
    assert_eq!(report.candidates, 3);
    assert_eq!(report.already_scheduled, 0);
    assert_eq!(report.enqueued, 3);

    let children = dal.job().get_by_group(coordinator.group_id, false).await.unwrap();
    assert_eq!(children.len(), 3);
    for child in &children {
        assert_eq!(child.group_id, coordinator.id);
        assert_eq!(child.role, JobRole::Processing);
        assert_eq!(child.status, JobStatus::Created);
        let definition: ChildDefinition = serde_json::from_str(&child.definition).unwrap();
        assert_eq!(definition.group_created_at, coordinator.created_at);
        assert_eq!(definition.payload, json!({"since": 1}));
        assert_eq!(child.idempotency_key.as_deref(), Some(definition.unit.key().as_str()));
    }
    assert_eq!(child_keys(&dal, coordinator.group_id).await, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_resumed_fan_out_enqueues_only_missing_units() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition = FanOutDefinition::parallel(categories(&["A", "B", "C"]), 1, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    // A previous run crashed after enqueueing A.
    let unit_a = WorkUnit {
        category: Some("A".into()),
        partition: None,
    };
    let child_a = ChildDefinition::for_unit(&definition, unit_a.clone(), coordinator.created_at);
    let existing = dal
        .job()
        .enqueue(
            QueueType::Export,
            Some(coordinator.group_id),
            vec![NewJob::keyed(serde_json::to_string(&child_a).unwrap(), unit_a.key())],
            JobRole::Processing,
        )
        .await
        .unwrap();

    let report = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap();
    assert_eq!(report.already_scheduled, 1);
    assert_eq!(report.enqueued, 2);

    let children = dal.job().get_by_group(coordinator.group_id, false).await.unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children.iter().filter(|job| job.id == existing[0]).count(), 1);
    assert_eq!(child_keys(&dal, coordinator.group_id).await, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_fan_out_twice_is_idempotent() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition =
        FanOutDefinition::parallel(categories(&["Patient", "Encounter"]), 3, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;
    let fan_out = FanOutCoordinator::new(dal.clone());

    let first = fan_out.fan_out(&coordinator).await.unwrap();
    let after_first: BTreeSet<String> =
        child_keys(&dal, coordinator.group_id).await.into_iter().collect();

    let second = fan_out.fan_out(&coordinator).await.unwrap();
    let after_second: BTreeSet<String> =
        child_keys(&dal, coordinator.group_id).await.into_iter().collect();

    assert_eq!(first.enqueued, 6);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.already_scheduled, 6);
    assert_eq!(after_first, after_second);
    assert_eq!(
        dal.job().get_by_group(coordinator.group_id, false).await.unwrap().len(),
        6
    );
}

#[tokio::test]
async fn test_non_parallel_definition_enqueues_single_child() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition = FanOutDefinition::single(categories(&["Patient", "Encounter"]), json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    let report = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap();
    assert_eq!(report.enqueued, 1);

    let children = dal.job().get_by_group(coordinator.group_id, false).await.unwrap();
    assert_eq!(children.len(), 1);
    let child: ChildDefinition = serde_json::from_str(&children[0].definition).unwrap();
    assert_eq!(child.unit, WorkUnit::whole());
    assert_eq!(child.categories_in_scope(), categories(&["Patient", "Encounter"]));
}

#[tokio::test]
async fn test_unkeyed_child_is_recognised_by_its_definition() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition = FanOutDefinition::parallel(categories(&["A", "B"]), 1, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    let unit_b = WorkUnit {
        category: Some("B".into()),
        partition: None,
    };
    let child_b = ChildDefinition::for_unit(&definition, unit_b, coordinator.created_at);
    dal.job()
        .enqueue(
            QueueType::Export,
            Some(coordinator.group_id),
            vec![NewJob::new(serde_json::to_string(&child_b).unwrap())],
            JobRole::Processing,
        )
        .await
        .unwrap();

    let report = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap();
    assert_eq!(report.already_scheduled, 1);
    assert_eq!(report.enqueued, 1);
}

#[tokio::test]
async fn test_invalid_definition_is_a_definition_error() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let engine = drover::JobEngine::from_dal(dal.clone());
    engine
        .create_group_raw(QueueType::Export, "not json".to_string())
        .await
        .unwrap();
    let coordinator = dal
        .job()
        .dequeue(QueueType::Export, 1, Duration::from_secs(60), "w")
        .await
        .unwrap()
        .remove(0);

    let error = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Definition(_)));
}

#[tokio::test]
async fn test_coordinator_body_reports_fan_out() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition = FanOutDefinition::parallel(categories(&["A"]), 2, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    let body = FanOutCoordinator::new(dal.clone());
    let outcome = body
        .execute(&coordinator, CancellationSignal::never(), ProgressReporter::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);
    let output = outcome.result.output.unwrap();
    assert_eq!(output["candidates"], 2);
    assert_eq!(output["enqueued"], 2);
}

#[tokio::test]
async fn test_cancel_while_coordinator_is_leased_stops_fan_out() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let engine = fixture.engine();
    let definition = FanOutDefinition::parallel(categories(&["A", "B"]), 1, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;
    assert_eq!(engine.cancel_group(coordinator.group_id).await.unwrap(), 1);

    // No heartbeat has run, so the body's own signal has not fired yet.
    let error = FanOutCoordinator::new(dal.clone())
        .execute(&coordinator, CancellationSignal::never(), ProgressReporter::new())
        .await
        .unwrap_err();
    assert!(matches!(error, JobError::Cancelled(CancelReason::Requested)));
    assert!(dal
        .job()
        .get_by_group(coordinator.group_id, false)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_children_fanned_out_after_cancel_are_cancelled() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let engine = fixture.engine();
    let definition = FanOutDefinition::parallel(categories(&["A", "B"]), 1, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;

    // Cancellation lands after the coordinator decided to fan out.
    engine.cancel_group(coordinator.group_id).await.unwrap();
    let report = FanOutCoordinator::new(dal.clone())
        .fan_out(&coordinator)
        .await
        .unwrap();
    assert_eq!(report.enqueued, 2);
    dal.job()
        .complete(
            coordinator.id,
            coordinator.version,
            JobStatus::Completed,
            JobResult::new().to_json().unwrap(),
            false,
        )
        .await
        .unwrap();

    let children = dal.job().get_by_group(coordinator.group_id, false).await.unwrap();
    assert!(children.iter().all(|child| child.cancel_requested));

    let config = fast_worker_config(QueueType::Export, 2);
    let registry = JobRegistry::new();
    for child in dal
        .job()
        .dequeue(QueueType::Export, 2, Duration::from_secs(60), "child-worker")
        .await
        .unwrap()
    {
        let report = execute_leased(&dal, &registry, &config, child).await;
        assert_eq!(report, ExecutionReport::Recorded(JobStatus::Cancelled));
    }

    let status = engine.group_status(coordinator.group_id).await.unwrap();
    assert_eq!(status.state, GroupState::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_outs_schedule_each_unit_once() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let definition =
        FanOutDefinition::parallel(categories(&["Patient", "Encounter", "Claim"]), 4, json!({}));
    let coordinator = leased_coordinator(&dal, &definition).await;
    let fan_out = FanOutCoordinator::new(dal.clone()).with_max_enqueue_attempts(1);

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let fan_out = fan_out.clone();
            let coordinator = coordinator.clone();
            tokio::spawn(async move { fan_out.fan_out(&coordinator).await })
        })
        .collect();

    let mut enqueued = 0;
    for run in runs {
        let report = run.await.unwrap().unwrap();
        assert_eq!(report.candidates, 12);
        assert_eq!(report.enqueued + report.already_scheduled, 12);
        enqueued += report.enqueued;
    }
    assert_eq!(enqueued, 12);

    let expected: BTreeSet<String> = definition.work_units().iter().map(WorkUnit::key).collect();
    let keys = child_keys(&dal, coordinator.group_id).await;
    assert_eq!(keys.len(), 12);
    assert_eq!(keys.into_iter().collect::<BTreeSet<_>>(), expected);
}
