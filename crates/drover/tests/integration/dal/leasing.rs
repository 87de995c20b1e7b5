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

use crate::fixtures::TestFixture;
use drover::dal::DAL;
use drover::{JobRole, JobStatus, NewJob, QueueType, StoreError};
use std::collections::HashSet;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);

async fn enqueue_processing(dal: &DAL, queue_type: QueueType, count: usize) -> Vec<i64> {
    let jobs = (0..count).map(|i| NewJob::new(format!("{{\"n\":{}}}", i))).collect();
    dal.job()
        .enqueue(queue_type, None, jobs, JobRole::Processing)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_dequeue_is_fifo_and_marks_running() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let ids = enqueue_processing(&dal, QueueType::Export, 3).await;

    let first = dal
        .job()
        .dequeue(QueueType::Export, 2, TIMEOUT, "worker-a")
        .await
        .unwrap();
    assert_eq!(first.iter().map(|job| job.id).collect::<Vec<_>>(), ids[..2]);
    for job in &first {
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.version, 2);
        let lease = job.lease.as_ref().unwrap();
        assert_eq!(lease.worker_id, "worker-a");
        assert!(!lease.lease_id.is_empty());
    }
    assert_ne!(
        first[0].lease.as_ref().unwrap().lease_id,
        first[1].lease.as_ref().unwrap().lease_id
    );

    let second = dal
        .job()
        .dequeue(QueueType::Export, 5, TIMEOUT, "worker-b")
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, ids[2]);

    assert!(dal
        .job()
        .dequeue(QueueType::Export, 5, TIMEOUT, "worker-b")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_dequeue_respects_queue_type_and_zero_count() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    enqueue_processing(&dal, QueueType::Import, 2).await;

    assert!(dal
        .job()
        .dequeue(QueueType::Export, 10, TIMEOUT, "w")
        .await
        .unwrap()
        .is_empty());
    assert!(dal
        .job()
        .dequeue(QueueType::Import, 0, TIMEOUT, "w")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        dal.job()
            .dequeue(QueueType::Import, 10, TIMEOUT, "w")
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_dequeue_roles_leaves_other_roles_queued() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let group_id = dal
        .job()
        .enqueue(
            QueueType::Export,
            None,
            vec![NewJob::new("{}")],
            JobRole::Coordinator,
        )
        .await
        .unwrap()[0];
    dal.job()
        .enqueue(
            QueueType::Export,
            Some(group_id),
            vec![NewJob::new("{}"), NewJob::new("{}")],
            JobRole::Processing,
        )
        .await
        .unwrap();

    let leased = dal
        .job()
        .dequeue_roles(QueueType::Export, &[JobRole::Coordinator], 10, TIMEOUT, "fan-out")
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, group_id);

    let rest = dal
        .job()
        .dequeue(QueueType::Export, 10, TIMEOUT, "worker-a")
        .await
        .unwrap();
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|job| job.role == JobRole::Processing));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_hands_out_a_job_twice() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let ids = enqueue_processing(&dal, QueueType::Export, 40).await;

    let mut workers = Vec::new();
    for worker in 0..5 {
        let dal = dal.clone();
        workers.push(tokio::spawn(async move {
            let worker_id = format!("worker-{}", worker);
            let mut leased = Vec::new();
            loop {
                let batch = dal
                    .job()
                    .dequeue(QueueType::Export, 3, TIMEOUT, &worker_id)
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                leased.extend(batch.into_iter().map(|job| job.id));
            }
            leased
        }));
    }

    let mut seen = HashSet::new();
    for worker in workers {
        for id in worker.await.unwrap() {
            assert!(seen.insert(id), "job {} was leased twice", id);
        }
    }
    assert_eq!(seen, ids.into_iter().collect::<HashSet<_>>());
}

#[tokio::test]
async fn test_stale_lease_is_reclaimed_and_old_owner_loses() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let ids = enqueue_processing(&dal, QueueType::Export, 1).await;

    let original = dal
        .job()
        .dequeue(QueueType::Export, 1, TIMEOUT, "worker-a")
        .await
        .unwrap()
        .remove(0);

    // Fresh heartbeat: nothing is eligible.
    assert!(dal
        .job()
        .dequeue(QueueType::Export, 1, TIMEOUT, "worker-b")
        .await
        .unwrap()
        .is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let reclaimed = dal
        .job()
        .dequeue(QueueType::Export, 1, Duration::from_millis(50), "worker-b")
        .await
        .unwrap()
        .remove(0);
    assert_eq!(reclaimed.id, ids[0]);
    assert!(reclaimed.version > original.version);
    let new_lease = reclaimed.lease.clone().unwrap();
    assert_eq!(new_lease.worker_id, "worker-b");
    assert_ne!(new_lease.lease_id, original.lease.as_ref().unwrap().lease_id);

    let error = dal
        .job()
        .heartbeat(original.id, original.lease.as_ref().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::LeaseLost { .. }));

    let error = dal
        .job()
        .complete(original.id, original.version, JobStatus::Completed, "{}".into(), false)
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::VersionConflict { .. }));

    dal.job()
        .heartbeat(reclaimed.id, &new_lease)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_uncompleted_job_stays_eligible() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    let ids = enqueue_processing(&dal, QueueType::Reindex, 1).await;

    for attempt in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let leased = dal
            .job()
            .dequeue(
                QueueType::Reindex,
                1,
                Duration::from_millis(50),
                &format!("crashing-worker-{}", attempt),
            )
            .await
            .unwrap();
        assert_eq!(leased.len(), 1, "attempt {}", attempt);
        assert_eq!(leased[0].id, ids[0]);
    }
}

#[tokio::test]
async fn test_heartbeat_renews_and_reports_cancellation() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    enqueue_processing(&dal, QueueType::Export, 1).await;

    let job = dal
        .job()
        .dequeue(QueueType::Export, 1, TIMEOUT, "worker-a")
        .await
        .unwrap()
        .remove(0);
    let lease = job.lease.clone().unwrap();

    let ack = dal.job().heartbeat(job.id, &lease).await.unwrap();
    assert_eq!(ack.version, job.version + 1);
    assert!(!ack.cancel_requested);

    let stored = dal.job().get(job.id).await.unwrap();
    assert!(stored.heartbeat_at >= job.heartbeat_at);
    assert_eq!(stored.version, ack.version);

    dal.job().cancel(job.group_id).await.unwrap();
    let ack = dal.job().heartbeat(job.id, &lease).await.unwrap();
    assert!(ack.cancel_requested);
}

#[tokio::test]
async fn test_heartbeat_fails_once_terminal() {
    let fixture = TestFixture::new().await;
    let dal = fixture.dal();
    enqueue_processing(&dal, QueueType::Export, 1).await;

    let job = dal
        .job()
        .dequeue(QueueType::Export, 1, TIMEOUT, "worker-a")
        .await
        .unwrap()
        .remove(0);
    dal.job()
        .complete(job.id, job.version, JobStatus::Completed, "{}".into(), false)
        .await
        .unwrap();

    let error = dal
        .job()
        .heartbeat(job.id, job.lease.as_ref().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::LeaseLost { job_id } if job_id == job.id));
}
