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

//! Delivery from claim to recorded outcome.

use std::sync::Arc;
use std::time::Duration;

use courier::dal::{Finalized, TaskDisposition};
use courier::models::{TaskOutcome, TaskState};
use courier::scheduler::throttle::StaticLoad;
use courier::scheduler::{Execution, TaskExecutor};
use courier::{
    AdapterRegistry, Audience, Command, ContentItem, CourierConfig, DeliveryDispatcher,
    DeliveryOutcome, DeliveryPayload, EndpointRegistry, HealthPolicy, HealthState, IpcSignal,
    Protocol, ProtocolAdapter, TaskScheduler, WorkSignal,
};

use crate::fixtures::{instant_retry, sqlite_fixture, ScriptedAdapter};

const INBOX: &str = "https://social.example/users/alice/inbox";

#[tokio::test]
async fn test_transient_failures_are_retried_until_delivered() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;

    let adapter = ScriptedAdapter::new([
        DeliveryOutcome::TransientFailure("connection refused".into()),
        DeliveryOutcome::TransientFailure("503".into()),
    ]);
    let adapters = AdapterRegistry::new();
    adapters.register(Protocol::ActivityPub, adapter.clone());
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let executor = TaskExecutor::new(
        dal.clone(),
        adapters,
        registry.clone(),
        Duration::from_secs(5),
        Duration::from_secs(3600),
    );

    let report = DeliveryDispatcher::new(dal.clone())
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task_id = report.task_ids[0];

    let mut dispositions = Vec::new();
    for _ in 0..3 {
        let task = dal.task_queue().claim_batch(1, 77).await.unwrap().remove(0);
        match executor.execute(&task, 77).await.unwrap() {
            Execution::Delivery(Finalized::Applied { disposition, .. }) => {
                dispositions.push(disposition)
            }
            other => panic!("unexpected execution {:?}", other),
        }
    }
    assert!(matches!(dispositions[0], TaskDisposition::Rescheduled { attempt: 1, .. }));
    assert!(matches!(dispositions[1], TaskDisposition::Rescheduled { attempt: 2, .. }));
    assert_eq!(dispositions[2], TaskDisposition::Delivered);

    let task = dal.task_queue().get(task_id).await.unwrap().unwrap();
    assert_eq!(task.attempt_count, 2);
    assert_eq!(task.state(), TaskState::Done(TaskOutcome::Success));

    let record = dal.delivery_record().get("post-1").await.unwrap();
    assert_eq!(record.delivered, 1);
    assert_eq!(record.failed, 0);
    assert_eq!(record.pending(), 0);

    let (status, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert_eq!(state, HealthState::Healthy);
    assert!(status.last_success.is_some());
    assert!(status.failing_since.is_none());

    let calls = adapter.calls();
    assert_eq!(calls.len(), 3);
    let attempts: Vec<i32> = calls.iter().map(|(_, payload)| payload.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert!(calls
        .iter()
        .all(|(endpoint, payload)| endpoint == INBOX && payload.delivery_id == calls[0].1.delivery_id));
}

#[tokio::test]
async fn test_second_finalize_of_same_claim_is_stale() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());

    DeliveryDispatcher::new(dal.clone())
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task = dal.task_queue().claim_batch(1, 5).await.unwrap().remove(0);
    let target = match task.decode().unwrap() {
        courier::Command::Deliver(target) => target,
        other => panic!("unexpected command {:?}", other),
    };

    let first = registry
        .record_delivery(task.id, 5, &target, &DeliveryOutcome::Success)
        .await
        .unwrap();
    assert!(matches!(
        first,
        Finalized::Applied {
            disposition: TaskDisposition::Delivered,
            ..
        }
    ));
    let second = registry
        .record_delivery(task.id, 5, &target, &DeliveryOutcome::Success)
        .await
        .unwrap();
    assert_eq!(second, Finalized::Stale);

    let record = dal.delivery_record().get("post-1").await.unwrap();
    assert_eq!(record.queued, 1);
    assert_eq!(record.delivered, 1);
}

#[tokio::test]
async fn test_lost_acknowledgment_redelivers_but_records_once() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;

    let adapter = ScriptedAdapter::new([DeliveryOutcome::TransientFailure("timeout".into())]);
    let adapters = AdapterRegistry::new();
    adapters.register(Protocol::ActivityPub, adapter.clone());
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let executor = TaskExecutor::new(
        dal.clone(),
        adapters,
        registry.clone(),
        Duration::from_secs(5),
        Duration::from_secs(3600),
    );

    DeliveryDispatcher::new(dal.clone())
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task = dal.task_queue().claim_batch(1, 1).await.unwrap().remove(0);
    executor.execute(&task, 1).await.unwrap();
    let (_, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert_eq!(state, HealthState::Degraded);

    // Worker 2 sends successfully, then dies before recording the result.
    let task = dal.task_queue().claim_batch(1, 2).await.unwrap().remove(0);
    let target = match task.decode().unwrap() {
        Command::Deliver(target) => target,
        other => panic!("unexpected command {:?}", other),
    };
    let payload = DeliveryPayload::new(
        &target.content_id,
        target.protocol,
        &target.endpoint,
        task.attempt_count,
    );
    assert!(adapter.deliver(&target.endpoint, &payload).await.is_success());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dal.task_queue().abandon_stale_claims(Duration::ZERO).await.unwrap(), 1);

    let reclaimed = dal.task_queue().claim_batch(1, 3).await.unwrap().remove(0);
    assert_eq!(reclaimed.id, task.id);
    let health = match executor.execute(&reclaimed, 3).await.unwrap() {
        Execution::Delivery(Finalized::Applied {
            disposition,
            health,
        }) => {
            assert_eq!(disposition, TaskDisposition::Delivered);
            health
        }
        other => panic!("unexpected execution {:?}", other),
    };
    assert!(health.recovered());

    let late = registry
        .record_delivery(task.id, 2, &target, &DeliveryOutcome::Success)
        .await
        .unwrap();
    assert_eq!(late, Finalized::Stale);

    let record = dal.delivery_record().get("post-1").await.unwrap();
    assert_eq!(record.delivered, 1);
    assert_eq!(record.failed, 0);
    let (_, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert_eq!(state, HealthState::Healthy);

    let calls = adapter.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls
        .iter()
        .all(|(_, sent)| sent.delivery_id == payload.delivery_id));
}

#[tokio::test]
async fn test_missing_adapter_defers_the_task() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let executor = TaskExecutor::new(
        dal.clone(),
        AdapterRegistry::new(),
        registry,
        Duration::from_secs(5),
        Duration::from_secs(3600),
    );

    DeliveryDispatcher::new(dal.clone())
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task = dal.task_queue().claim_batch(1, 8).await.unwrap().remove(0);
    let execution = executor.execute(&task, 8).await.unwrap();
    assert!(matches!(
        execution,
        Execution::Delivery(Finalized::Applied {
            disposition: TaskDisposition::Rescheduled { attempt: 1, .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_scheduler_delivers_signalled_work() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;

    let adapter = ScriptedAdapter::new(Vec::new());
    let adapters = AdapterRegistry::new();
    adapters.register(Protocol::ActivityPub, adapter.clone());
    let signal: Arc<dyn WorkSignal> = Arc::new(IpcSignal::with_intervals(
        dal.clone(),
        Duration::from_millis(20),
        Duration::from_millis(200),
    ));
    let config = CourierConfig::builder()
        .max_workers(2)
        .poll_interval(Duration::from_millis(200))
        .build()
        .unwrap();
    let scheduler = Arc::new(
        TaskScheduler::new(dal.clone(), config, adapters, signal.clone())
            .with_retry_policy(instant_retry())
            .with_load_probe(Arc::new(StaticLoad(None))),
    );
    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    let report = DeliveryDispatcher::new(dal.clone())
        .with_signal(signal)
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task_id = report.task_ids[0];

    let mut delivered = false;
    for _ in 0..100 {
        let task = dal.task_queue().get(task_id).await.unwrap().unwrap();
        if task.done {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    scheduler.shutdown();
    handle.await.unwrap().unwrap();

    assert!(delivered, "scheduler never finished the task");
    assert_eq!(adapter.calls().len(), 1);
    assert_eq!(dal.delivery_record().get("post-1").await.unwrap().delivered, 1);
}
