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

//! End-to-end runs of the worker loop against a real store.

use crate::fixtures::{fast_worker_config, wait_until_settled, TestFixture};
use async_trait::async_trait;
use drover::executor::{execute_leased, ExecutionReport};
use drover::orchestrator::{ChildDefinition, FanOutCoordinator, FanOutDefinition};
use drover::{
    CancellationSignal, GroupState, IssueCode, Job, JobBody, JobEngine, JobError, JobOutcome,
    JobRegistry, JobResult, JobRole, JobStatus, NewJob, ProgressReporter, QueueType,
    WorkerConfig,
};
use serde_json::json;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Behaves according to the category of its work unit:
/// `fail*` fails after a short delay, `wait*` runs until cancelled,
/// `panic*` panics, anything else completes with a counter of 5.
struct ScriptedChild;

#[async_trait]
impl JobBody for ScriptedChild {
    async fn execute(
        &self,
        job: &Job,
        signal: CancellationSignal,
        progress: ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        let definition: ChildDefinition = serde_json::from_str(&job.definition)?;
        let category = definition.unit.category.clone().unwrap_or_default();

        if category.starts_with("fail") {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(JobOutcome::failed("upstream rejected the batch"));
        }
        if category.starts_with("wait") {
            progress.report(JobResult::new().with_counter(category.as_str(), 1));
            return tokio::select! {
                reason = signal.cancelled() => Err(JobError::Cancelled(reason)),
                _ = tokio::time::sleep(Duration::from_secs(10)) => {
                    Ok(JobOutcome::failed("cancellation never arrived"))
                }
            };
        }
        if category.starts_with("panic") {
            panic!("body exploded");
        }

        signal.check()?;
        Ok(JobOutcome::completed(
            JobResult::new().with_counter(category.as_str(), 5),
        ))
    }
}

fn registry(engine: &JobEngine, queue_type: QueueType) -> JobRegistry {
    let registry = JobRegistry::new();
    registry.register(
        queue_type,
        JobRole::Coordinator,
        FanOutCoordinator::new(engine.dal().clone()),
    );
    registry.register(queue_type, JobRole::Processing, ScriptedChild);
    registry
}

fn parallel(names: &[&str]) -> FanOutDefinition {
    FanOutDefinition::parallel(names.iter().map(|name| name.to_string()).collect(), 1, json!({}))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_fan_out_runs_to_completion() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();
    let worker = engine
        .worker(
            registry(&engine, QueueType::Export),
            fast_worker_config(QueueType::Export, 4),
        )
        .spawn();

    let group_id = engine
        .create_group(QueueType::Export, &parallel(&["A", "B", "C"]))
        .await
        .unwrap();
    let status = wait_until_settled(&engine, group_id).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Completed);
    assert_eq!(status.job_count, 4);
    assert_eq!(status.counters["A"], 5);
    assert_eq!(status.counters["B"], 5);
    assert_eq!(status.counters["C"], 5);
    assert!(status.issues.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_failure_cascades_cancellation_to_siblings() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();
    let worker = engine
        .worker(
            registry(&engine, QueueType::Export),
            fast_worker_config(QueueType::Export, 8),
        )
        .spawn();

    let group_id = engine
        .create_group(
            QueueType::Export,
            &parallel(&["done", "fail", "wait-1", "wait-2"]),
        )
        .await
        .unwrap();
    let status = wait_until_settled(&engine, group_id).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Failed);
    assert_eq!(status.counters.get("done"), Some(&5));
    assert!(status.issues.iter().any(|issue| issue.code == IssueCode::Exception));

    let children = engine.dal().job().get_by_group(group_id, false).await.unwrap();
    for child in &children {
        let key = child.idempotency_key.as_deref().unwrap();
        let expected = match key {
            "done" => JobStatus::Completed,
            "fail" => JobStatus::Failed,
            _ => JobStatus::Cancelled,
        };
        assert_eq!(child.status, expected, "child {}", key);
    }

    // Cancelled children keep the progress they reported.
    let waited = children
        .iter()
        .find(|child| child.idempotency_key.as_deref() == Some("wait-1"))
        .unwrap();
    let result = JobResult::from_json(waited.result.as_deref().unwrap()).unwrap();
    assert_eq!(result.counters.get("wait-1"), Some(&1));
    assert!(result.has_issue(IssueCode::Cancelled));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_cancelled_group_never_runs_its_coordinator() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();

    let group_id = engine
        .create_group(QueueType::Export, &parallel(&["A", "B"]))
        .await
        .unwrap();
    engine.cancel_group(group_id).await.unwrap();

    let worker = engine
        .worker(
            registry(&engine, QueueType::Export),
            fast_worker_config(QueueType::Export, 2),
        )
        .spawn();
    let status = wait_until_settled(&engine, group_id).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Cancelled);
    assert_eq!(status.job_count, 1);
    let coordinator = engine.dal().job().get(group_id).await.unwrap();
    assert_eq!(coordinator.status, JobStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_missing_body_fails_the_job() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();

    let registry = JobRegistry::new();
    registry.register(
        QueueType::Import,
        JobRole::Coordinator,
        FanOutCoordinator::new(engine.dal().clone()),
    );
    let worker = engine
        .worker(registry, fast_worker_config(QueueType::Import, 2))
        .spawn();

    let group_id = engine
        .create_group(QueueType::Import, &parallel(&["A"]))
        .await
        .unwrap();
    let status = wait_until_settled(&engine, group_id).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Failed);
    assert!(status
        .issues
        .iter()
        .any(|issue| issue.code == IssueCode::UnknownJobType));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_panicking_body_is_recorded_as_failure() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();
    let worker = engine
        .worker(
            registry(&engine, QueueType::Export),
            fast_worker_config(QueueType::Export, 2),
        )
        .spawn();

    let group_id = engine
        .create_group(QueueType::Export, &parallel(&["panic"]))
        .await
        .unwrap();
    let status = wait_until_settled(&engine, group_id).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Failed);
    assert!(status
        .issues
        .iter()
        .any(|issue| issue.message.contains("body exploded")));
}

/// Tracks how many executions overlap.
struct Gauge {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl JobBody for Gauge {
    async fn execute(
        &self,
        _job: &Job,
        _signal: CancellationSignal,
        _progress: ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(JobOutcome::completed(JobResult::new().with_counter("rows", 1)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_worker_never_exceeds_its_ceiling() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();
    let peak = Arc::new(AtomicUsize::new(0));

    let registry = JobRegistry::new();
    registry.register(
        QueueType::Reindex,
        JobRole::Processing,
        Gauge {
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        },
    );

    let ids = engine
        .dal()
        .job()
        .enqueue(
            QueueType::Reindex,
            None,
            (0..8).map(|i| NewJob::new(format!("{}", i))).collect(),
            JobRole::Processing,
        )
        .await
        .unwrap();

    let worker = engine
        .worker(registry, fast_worker_config(QueueType::Reindex, 2))
        .spawn();
    let status = wait_until_settled(&engine, ids[0]).await;
    worker.shutdown().await.unwrap();

    assert_eq!(status.state, GroupState::Completed);
    assert_eq!(status.counters["rows"], 8);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_stopped_worker_takes_no_new_leases() {
    let fixture = TestFixture::new().await;
    let engine = fixture.engine();
    let worker = engine
        .worker(
            registry(&engine, QueueType::Export),
            fast_worker_config(QueueType::Export, 2),
        )
        .spawn();
    worker.shutdown().await.unwrap();

    let group_id = engine
        .create_group(QueueType::Export, &parallel(&["A"]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let coordinator = engine.dal().job().get(group_id).await.unwrap();
    assert_eq!(coordinator.status, JobStatus::Created);
    assert!(coordinator.lease.is_none());
}

/// Runs until cancelled.
struct Waiting;

#[async_trait]
impl JobBody for Waiting {
    async fn execute(
        &self,
        _job: &Job,
        signal: CancellationSignal,
        _progress: ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        let reason = signal.cancelled().await;
        Err(JobError::Cancelled(reason))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_lost_lease_stops_the_body_and_discards_its_result() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    dal.job()
        .enqueue(QueueType::Export, None, vec![NewJob::new("{}")], JobRole::Processing)
        .await
        .unwrap();
    let job = dal
        .job()
        .dequeue(QueueType::Export, 1, Duration::from_secs(60), "worker-a")
        .await
        .unwrap()
        .remove(0);
    let job_id = job.id;

    let registry = JobRegistry::new();
    registry.register(QueueType::Export, JobRole::Processing, Waiting);
    let config = WorkerConfig::builder(QueueType::Export)
        .heartbeat_interval(Duration::from_millis(100))
        .heartbeat_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let execution = {
        let dal = dal.clone();
        tokio::spawn(async move { execute_leased(&dal, &registry, &config, job).await })
    };

    // Another worker treats every running job as stale and takes this one.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let reclaimed = dal
        .job()
        .dequeue(QueueType::Export, 1, Duration::ZERO, "worker-b")
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);

    let report = tokio::time::timeout(Duration::from_secs(5), execution)
        .await
        .expect("execution did not stop after losing its lease")
        .unwrap();
    assert_eq!(report, ExecutionReport::Discarded);

    let stored = dal.job().get(job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.lease.unwrap().worker_id, "worker-b");
}
