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

//! Fan-out of content to physical endpoints.

use courier::dispatcher::RelayFilter;
use courier::models::{NewRemoteContact, NewRemoteServer, Priority, RelayScope};
use courier::{Audience, Command, ContentItem, DeliveryDispatcher, Protocol};

use crate::fixtures::sqlite_fixture;

#[tokio::test]
async fn test_shared_inbox_receives_one_delivery() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    for name in ["alice", "bob", "carol"] {
        fixture
            .follower(
                &server,
                1,
                &format!("https://social.example/users/{}/inbox", name),
                Some("https://social.example/inbox"),
            )
            .await;
    }

    let dispatcher = DeliveryDispatcher::new(dal.clone());
    let report = dispatcher
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();

    assert_eq!(report.task_ids.len(), 1);
    assert_eq!(report.queued(), 1);
    let task = dal.task_queue().get(report.task_ids[0]).await.unwrap().unwrap();
    match task.decode().unwrap() {
        Command::Deliver(target) => {
            assert_eq!(target.endpoint, "https://social.example/inbox");
            assert_eq!(target.server_id, Some(server.id));
        }
        other => panic!("unexpected command {:?}", other),
    }

    let record = dal.delivery_record().get("post-1").await.unwrap();
    assert_eq!(record.queued, 1);
    assert_eq!(record.protocol(Protocol::ActivityPub).queued, 1);
    assert!(dal
        .inbox_status()
        .get("https://social.example/inbox")
        .await
        .unwrap()
        .unwrap()
        .is_shared);
}

#[tokio::test]
async fn test_repeated_fan_out_does_not_duplicate_tasks() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    let contact = fixture
        .follower(&server, 1, "https://social.example/users/alice/inbox", None)
        .await;

    let dispatcher = DeliveryDispatcher::new(dal.clone());
    let content = ContentItem::new("post-1").interactive();
    let audience = Audience::contacts([contact.id]).with_relays();

    let first = dispatcher.fan_out(&content, &audience).await.unwrap();
    let second = dispatcher.fan_out(&content, &audience).await.unwrap();

    assert_eq!(first.queued(), 1);
    assert_eq!(second.queued(), 0);
    assert_eq!(second.already_queued, vec!["https://social.example/users/alice/inbox".to_string()]);
    let task = dal.task_queue().get(first.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.priority, Priority::HIGH);
    assert_eq!(dal.delivery_record().get("post-1").await.unwrap().queued, 1);
}

#[tokio::test]
async fn test_archived_endpoints_are_skipped_unless_ignored() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let server = fixture.server("https://social.example").await;
    fixture
        .follower(&server, 1, "https://social.example/users/alice/inbox", None)
        .await;
    let bob = fixture
        .follower(&server, 1, "https://social.example/users/bob/inbox", None)
        .await;

    dal.inbox_status()
        .ensure("https://social.example/users/bob/inbox", false)
        .await
        .unwrap();
    assert!(dal
        .inbox_status()
        .set_archived("https://social.example/users/bob/inbox", true)
        .await
        .unwrap());

    let report = DeliveryDispatcher::new(dal.clone())
        .fan_out(&ContentItem::new("post-1"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 1);
    assert_eq!(report.archived_contacts, vec![bob.id]);

    let report = DeliveryDispatcher::new(dal.clone())
        .ignore_archived(true)
        .fan_out(&ContentItem::new("post-2"), &Audience::followers_of(1))
        .await
        .unwrap();
    assert_eq!(report.queued(), 2);
    assert!(report.skipped_archived.is_empty());
    assert!(report.archived_contacts.is_empty());
}

#[tokio::test]
async fn test_relays_receive_only_solicited_public_posts() {
    let fixture = sqlite_fixture().await;
    let dal = fixture.dal();
    let relay = dal
        .remote_server()
        .upsert(
            &NewRemoteServer::new("https://relay.example", "activitypub")
                .relay(RelayScope::Tags, vec!["rust".to_string()]),
        )
        .await
        .unwrap();
    dal.remote_contact()
        .create(&NewRemoteContact {
            server_id: relay.id,
            owner_id: 0,
            protocol: Protocol::ActivityPub,
            inbox: "https://relay.example/inbox".to_string(),
            shared_inbox: None,
            is_follower: false,
            is_relay: true,
        })
        .await
        .unwrap();

    let dispatcher = DeliveryDispatcher::new(dal.clone())
        .with_relay_filter(RelayFilter::new(["nsfw"]));
    let audience = Audience::default().with_relays();

    let solicited = dispatcher
        .fan_out(&ContentItem::new("post-1").with_tags(["#Rust"]), &audience)
        .await
        .unwrap();
    assert_eq!(solicited.queued(), 1);
    let task = dal.task_queue().get(solicited.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.priority, Priority::LOW);

    let unrelated = dispatcher
        .fan_out(&ContentItem::new("post-2").with_tags(["cooking"]), &audience)
        .await
        .unwrap();
    assert_eq!(unrelated.queued(), 0);

    let denied = dispatcher
        .fan_out(&ContentItem::new("post-3").with_tags(["rust", "NSFW"]), &audience)
        .await
        .unwrap();
    assert_eq!(denied.queued(), 0);

    let private = dispatcher
        .fan_out(&ContentItem::new("post-4").with_tags(["rust"]).private(), &audience)
        .await
        .unwrap();
    assert_eq!(private.queued(), 0);
}
