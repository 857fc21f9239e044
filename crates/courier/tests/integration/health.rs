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

//! Endpoint health: failure streaks, archival and manual overrides.

use chrono::{Duration, Utc};
use courier::command::DeliveryTarget;
use courier::dal::{Finalized, TaskDisposition};
use courier::{
    Audience, Command, ContentItem, DeliveryDispatcher, DeliveryOutcome, EndpointRegistry,
    HealthPolicy, HealthState, Task, DAL,
};

use crate::fixtures::{instant_retry, sqlite_fixture};

const INBOX: &str = "https://social.example/users/alice/inbox";
const SHARED: &str = "https://social.example/inbox";

async fn claim_delivery(dal: &DAL, worker_id: i64) -> (Task, DeliveryTarget) {
    let task = dal.task_queue().claim_batch(1, worker_id).await.unwrap().remove(0);
    match task.decode().unwrap() {
        Command::Deliver(target) => (task, target),
        other => panic!("unexpected command {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_streak_archives_after_threshold() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    let contact = fixture.follower(&server, 1, INBOX, None).await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::new(32), instant_retry());
    let dispatcher = DeliveryDispatcher::new(dal.clone());

    let report = dispatcher
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let task = dal.task_queue().claim_batch(1, 3).await.unwrap().remove(0);
    let target = match task.decode().unwrap() {
        courier::Command::Deliver(target) => target,
        other => panic!("unexpected command {:?}", other),
    };
    assert_eq!(task.id, report.task_ids[0]);

    let finalized = registry
        .record_delivery(task.id, 3, &target, &DeliveryOutcome::PermanentFailure("410 Gone".into()))
        .await
        .unwrap();
    match finalized {
        Finalized::Applied {
            disposition,
            health,
        } => {
            assert_eq!(disposition, TaskDisposition::Rejected);
            assert_eq!(health.from, HealthState::Healthy);
            assert_eq!(health.to, HealthState::Degraded);
        }
        Finalized::Stale => panic!("delivery should have applied"),
    }

    let (status, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert_eq!(state, HealthState::Degraded);
    assert!(status.failing_since.is_some());
    assert_eq!(dal.delivery_record().get("post-1").await.unwrap().failed, 1);

    let server = dal.remote_server().get(server.id).await.unwrap().unwrap();
    assert!(server.failed);
    assert!(server.next_contact.unwrap() >= Utc::now() + Duration::minutes(59));

    let now = Utc::now();
    assert!(registry.health_sweep_at(now + Duration::days(31)).await.unwrap().is_empty());
    assert_eq!(
        registry.health_sweep_at(now + Duration::days(33)).await.unwrap(),
        vec![INBOX.to_string()]
    );

    let (status, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert!(status.archived);
    assert_eq!(state, HealthState::Archived);
    let contact = dal.remote_contact().get(contact.id).await.unwrap().unwrap();
    assert!(contact.archived);

    let skipped = dispatcher
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(skipped.queued(), 0);
    assert_eq!(skipped.archived_contacts, vec![contact.id]);

    let summary = registry.summary().await.unwrap();
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.healthy, 0);
}

#[tokio::test]
async fn test_manual_overrides() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let dispatcher = DeliveryDispatcher::new(dal.clone());

    assert!(!registry.force_archive("https://unknown.example/inbox").await.unwrap());

    dispatcher
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert!(registry.force_archive(INBOX).await.unwrap());
    assert_eq!(registry.list_archived().await.unwrap().len(), 1);
    let report = dispatcher
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 0);

    assert!(registry.force_reprobe(INBOX).await.unwrap());
    let (_, state) = registry.status(INBOX).await.unwrap().unwrap();
    assert_eq!(state, HealthState::Healthy);
    let report = dispatcher
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 1);
}

#[tokio::test]
async fn test_archived_contact_stays_archived_until_success() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    let alice = fixture.follower(&server, 1, INBOX, Some(SHARED)).await;
    let bob = fixture
        .follower(&server, 1, "https://social.example/users/bob/inbox", Some(SHARED))
        .await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let dispatcher = DeliveryDispatcher::new(dal.clone());

    dal.inbox_status().ensure(INBOX, false).await.unwrap();
    assert!(registry.force_archive(INBOX).await.unwrap());
    assert!(dal.remote_contact().get(alice.id).await.unwrap().unwrap().archived);

    let report = dispatcher
        .fan_out(&ContentItem::new("post-1"), &Audience::contacts([alice.id]))
        .await
        .unwrap();
    assert_eq!(report.queued(), 0);
    assert_eq!(report.archived_contacts, vec![alice.id]);

    // Bob still gets the post through the shared inbox.
    let report = dispatcher
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 1);
    assert_eq!(report.archived_contacts, vec![alice.id]);

    let (task, target) = claim_delivery(&dal, 5).await;
    assert_eq!(target.endpoint, SHARED);
    registry
        .record_delivery(task.id, 5, &target, &DeliveryOutcome::TransientFailure("503".into()))
        .await
        .unwrap();
    assert!(dal.remote_contact().get(alice.id).await.unwrap().unwrap().archived);
    assert!(!dal.remote_contact().get(bob.id).await.unwrap().unwrap().archived);

    let (task, target) = claim_delivery(&dal, 5).await;
    registry
        .record_delivery(task.id, 5, &target, &DeliveryOutcome::Success)
        .await
        .unwrap();
    assert!(!dal.remote_contact().get(alice.id).await.unwrap().unwrap().archived);
}

#[tokio::test]
async fn test_expired_streak_is_skipped_before_sweep() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture.follower(&server, 1, INBOX, None).await;
    let registry = EndpointRegistry::new(dal.clone(), HealthPolicy::default(), instant_retry());
    let dispatcher = DeliveryDispatcher::new(dal.clone());

    dispatcher
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    let (task, target) = claim_delivery(&dal, 7).await;
    registry
        .record_delivery(task.id, 7, &target, &DeliveryOutcome::PermanentFailure("410 Gone".into()))
        .await
        .unwrap();
    assert!(!dal.inbox_status().get(INBOX).await.unwrap().unwrap().archived);

    // With no grace period the running streak is already past the threshold.
    let strict = DeliveryDispatcher::new(dal.clone()).with_health_policy(HealthPolicy::new(0));
    let report = strict
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 0);
    assert_eq!(report.skipped_archived, vec![INBOX.to_string()]);
    assert!(report.archived_contacts.is_empty());

    let report = dispatcher
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 1);
}
