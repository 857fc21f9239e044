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

//! Task store behavior: claiming, ordering, deferral and cleanup.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier::dal::{ClaimRequest, DeferResult, DAL};
use courier::models::{Priority, TaskOutcome, TaskState};
use courier::RetryPolicy;
use tokio::sync::Barrier;

use crate::fixtures::{deliver, instant_retry, sqlite_fixture};

/// Concurrent workers never receive the same task.
#[tokio::test]
async fn test_concurrent_claims_are_exclusive() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();

    const NUM_TASKS: usize = 20;
    let mut created = HashSet::new();
    for i in 0..NUM_TASKS {
        let id = dal
            .task_queue()
            .enqueue(&deliver(&format!("post-{}", i), "https://a.example/inbox"), Priority::MEDIUM)
            .await
            .expect("Failed to enqueue");
        created.insert(id);
    }

    const NUM_WORKERS: usize = 8;
    let barrier = Arc::new(Barrier::new(NUM_WORKERS));
    let mut handles = Vec::new();
    for worker in 0..NUM_WORKERS {
        let dal: DAL = dal.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut claimed = Vec::new();
            loop {
                let batch = dal
                    .task_queue()
                    .claim_batch(3, worker as i64 + 1)
                    .await
                    .expect("Claim failed");
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|t| t.id));
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.expect("Worker panicked") {
            assert!(seen.insert(id), "Task {} was claimed twice", id);
        }
    }
    assert_eq!(seen, created);
}

#[tokio::test]
async fn test_claim_takes_most_urgent_first() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();

    let mut ids = Vec::new();
    for (i, value) in [5, 1, 3].into_iter().enumerate() {
        let command = deliver(&format!("post-{}", i), "https://a.example/inbox");
        ids.push(queue.enqueue(&command, Priority(value)).await.unwrap());
    }

    let first = queue.claim_batch(1, 7).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, ids[1]);
    assert_eq!(first[0].priority, Priority(1));
    assert_eq!(first[0].state(), TaskState::Claimed);

    let rest = queue.claim_batch(10, 7).await.unwrap();
    let order: Vec<i64> = rest.iter().map(|t| t.id).collect();
    assert_eq!(order, vec![ids[2], ids[0]]);
}

#[tokio::test]
async fn test_claim_respects_priority_floor_and_not_before() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();

    queue
        .enqueue(&deliver("low", "https://a.example/inbox"), Priority::LOW)
        .await
        .unwrap();
    queue
        .enqueue_at(
            &deliver("later", "https://a.example/inbox"),
            Priority::CRITICAL,
            Utc::now() + chrono::Duration::hours(1),
        )
        .await
        .unwrap();

    let request = ClaimRequest::new(5, 3).at_or_above(Priority::HIGH);
    assert!(queue.claim_with(request).await.unwrap().is_empty());
    assert_eq!(queue.highest_pending_priority().await.unwrap(), Some(Priority::LOW));

    let claimed = queue.claim_batch(5, 3).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].priority, Priority::LOW);
}

#[tokio::test]
async fn test_duplicate_enqueue_promotes_waiting_task() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();
    let command = deliver("post-1", "https://a.example/inbox");

    let first = queue.submit(&command, Priority::LOW, None).await.unwrap();
    let second = queue.submit(&command, Priority::HIGH, None).await.unwrap();
    assert!(first.inserted);
    assert!(!second.inserted);
    assert_eq!(first.id, second.id);

    let task = queue.get(first.id).await.unwrap().unwrap();
    assert_eq!(task.priority, Priority::HIGH);

    // Once finished, the same command may be queued again.
    queue.claim_batch(1, 9).await.unwrap();
    assert!(queue.complete(first.id, 9, TaskOutcome::Success).await.unwrap());
    let third = queue.submit(&command, Priority::LOW, None).await.unwrap();
    assert!(third.inserted);
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn test_defer_delays_grow_with_each_attempt() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();
    let policy = RetryPolicy::default()
        .with_unit(Duration::from_millis(1))
        .with_jitter(false);

    let id = queue
        .enqueue(&deliver("post-1", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();

    let mut gaps = Vec::new();
    for expected_attempt in 1..=3 {
        let claimed = queue.claim_batch(1, 11).await.unwrap();
        assert_eq!(claimed.len(), 1, "task should be due again");
        let before = Utc::now();
        match queue.defer(id, 11, &policy).await.unwrap() {
            DeferResult::Rescheduled {
                attempt,
                next_attempt_at,
            } => {
                assert_eq!(attempt, expected_attempt);
                gaps.push(next_attempt_at - before);
                let wait = (next_attempt_at - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait + Duration::from_millis(20)).await;
            }
            other => panic!("unexpected defer result {:?}", other),
        }
    }

    assert!(gaps.windows(2).all(|w| w[0] < w[1]), "gaps {:?}", gaps);
    let task = queue.get(id).await.unwrap().unwrap();
    assert_eq!(task.attempt_count, 3);
    assert_eq!(task.state(), TaskState::Deferred);
}

#[tokio::test]
async fn test_defer_gives_up_at_attempt_ceiling() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();
    let policy = RetryPolicy::new(3)
        .with_unit(Duration::ZERO)
        .with_jitter(false);

    let id = queue
        .enqueue(&deliver("post-1", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();

    for attempt in 1..=3 {
        queue.claim_batch(1, 5).await.unwrap();
        assert!(matches!(
            queue.defer(id, 5, &policy).await.unwrap(),
            DeferResult::Rescheduled { attempt: a, .. } if a == attempt
        ));
    }
    queue.claim_batch(1, 5).await.unwrap();
    assert_eq!(
        queue.defer(id, 5, &policy).await.unwrap(),
        DeferResult::Exhausted { attempts: 3 }
    );

    let task = queue.get(id).await.unwrap().unwrap();
    assert_eq!(task.state(), TaskState::Done(TaskOutcome::AttemptsExhausted));
    assert!(queue.claim_batch(1, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_results_from_stale_claims_are_ignored() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();

    let id = queue
        .enqueue(&deliver("post-1", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();
    queue.claim_batch(1, 21).await.unwrap();

    assert!(!queue.complete(id, 22, TaskOutcome::Success).await.unwrap());
    assert_eq!(queue.defer(id, 22, &instant_retry()).await.unwrap(), DeferResult::Stale);
    assert!(queue.cancel(id).await.unwrap());
    assert!(!queue.complete(id, 21, TaskOutcome::Success).await.unwrap());

    let task = queue.get(id).await.unwrap().unwrap();
    assert_eq!(task.state(), TaskState::Done(TaskOutcome::Cancelled));
}

#[tokio::test]
async fn test_abandoned_claims_are_released() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();

    let id = queue
        .enqueue(&deliver("post-1", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();
    queue.claim_batch(1, 31).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.abandon_stale_claims(Duration::from_millis(10)).await.unwrap(), 1);
    let reclaimed = queue.claim_batch(1, 32).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, id);
    assert_eq!(reclaimed[0].claimed_by, 32);
}

#[tokio::test]
async fn test_purge_removes_only_old_finished_tasks() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let queue = dal.task_queue();

    let done = queue
        .enqueue(&deliver("done", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();
    queue.claim_batch(1, 41).await.unwrap();
    queue.complete(done, 41, TaskOutcome::Success).await.unwrap();
    let waiting = queue
        .enqueue(&deliver("waiting", "https://a.example/inbox"), Priority::MEDIUM)
        .await
        .unwrap();

    assert_eq!(queue.count_done_older_than(Duration::from_secs(3600)).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.count_done_older_than(Duration::from_millis(10)).await.unwrap(), 1);
    assert_eq!(queue.purge_done(Duration::from_millis(10)).await.unwrap(), 1);

    assert!(queue.get(done).await.unwrap().is_none());
    assert!(queue.get(waiting).await.unwrap().is_some());
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.done, 0);
}
