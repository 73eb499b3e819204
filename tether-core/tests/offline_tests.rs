mod common;

use std::sync::Arc;

use common::TestRig;
use tether_core::store::FileStore;
use tether_core::test_utils::EventCollector;
use tether_core::{CancellationToken, ConnectionState, TetherEvent, TransportError};

#[tokio::test]
async fn test_offline_then_online_drains_fifo() {
    let rig = TestRig::new(false);

    // Offline: queued, transport untouched
    let err = rig.send("queued while offline").await.unwrap_err();
    assert!(err.is_queued());
    assert_eq!(rig.queue.len().await.unwrap(), 1);
    assert_eq!(rig.transport.call_count(), 0);

    // Online: the old request goes out before the new one
    rig.transport.push_text("reply to queued");
    rig.transport.push_text("reply to new");
    rig.set_online(true).await;
    assert_eq!(rig.monitor.state(), ConnectionState::Connected);

    let completion = rig.send("sent while online").await.unwrap();

    assert_eq!(completion.message.text(), "reply to new");
    assert_eq!(
        rig.transport.sent_texts(),
        vec!["queued while offline", "sent while online"]
    );
    assert!(rig.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_network_failure_queues_instead_of_failing() {
    let rig = TestRig::new(true);
    rig.transport
        .push_error(TransportError::Network("connection reset by peer".into()));

    let err = rig.send("hello").await.unwrap_err();

    assert!(err.is_queued());
    assert!(err.agent_error().is_none());
    let queued = rig.queue.get_all().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].messages[0].text(), "hello");
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("offline.json");

    {
        let rig = TestRig::with_store(false, Arc::new(FileStore::new(&path)));
        rig.send("one").await.unwrap_err();
        rig.send("two").await.unwrap_err();
    }

    let rig = TestRig::with_store(true, Arc::new(FileStore::new(&path)));
    rig.transport.push_text("r1");
    rig.transport.push_text("r2");

    let summary = rig
        .client
        .process_queued_messages(&CancellationToken::new())
        .await;

    assert_eq!(summary.delivered, 2);
    assert_eq!(rig.transport.sent_texts(), vec!["one", "two"]);
    assert!(rig.queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_failed_delivery_expires_after_budget() {
    let rig = TestRig::new(false);
    rig.send("doomed").await.unwrap_err();
    rig.set_online(true).await;

    // Default budget is five attempts
    for _ in 0..5 {
        rig.transport.push_error(TransportError::status(500));
        let summary = rig
            .client
            .process_queued_messages(&CancellationToken::new())
            .await;
        assert_eq!(summary.failed, 1);
    }

    assert!(rig.queue.is_empty().await.unwrap());
    assert_eq!(rig.transport.call_count(), 5);
}

#[tokio::test]
async fn test_agents_drain_only_their_own_backlog() {
    let rig = TestRig::new(false);
    let other = TestRig::client_for("reviewer", &rig.transport, &rig.monitor, &rig.queue);

    rig.send("for helper").await.unwrap_err();
    other
        .complete(
            vec![tether_core::Message::user("for reviewer")],
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    rig.set_online(true).await;
    rig.transport.push_text("ok");
    let summary = rig
        .client
        .process_queued_messages(&CancellationToken::new())
        .await;

    assert_eq!(summary.delivered, 1);
    assert_eq!(rig.transport.sent_texts(), vec!["for helper"]);
    let remaining = rig.queue.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].agent_name, "reviewer");
}

#[tokio::test]
async fn test_events_follow_the_request_lifecycle() {
    let rig = TestRig::new(false);
    let queue_events = EventCollector::new();
    let client_events = EventCollector::new();
    let monitor_events = EventCollector::new();
    rig.queue.add_hook(queue_events.clone());
    rig.client.add_hook(client_events.clone());
    rig.monitor.add_hook(monitor_events.clone());

    rig.send("later").await.unwrap_err();
    assert_eq!(queue_events.event_types(), vec!["message_enqueued"]);

    rig.set_online(true).await;
    rig.transport.push_text("delivered");
    rig.client
        .process_queued_messages(&CancellationToken::new())
        .await;

    assert_eq!(
        queue_events.event_types(),
        vec!["message_enqueued", "message_dequeued"]
    );
    match client_events.events().as_slice() {
        [TetherEvent::QueuedMessageDelivered {
            agent_name,
            completion,
            ..
        }] => {
            assert_eq!(agent_name, "helper");
            assert_eq!(completion.message.text(), "delivered");
        }
        other => panic!("unexpected events: {:?}", other),
    }
    assert!(monitor_events.events().iter().any(|event| matches!(
        event,
        TetherEvent::ConnectionStateChanged {
            current: ConnectionState::Connected,
            ..
        }
    )));
}
