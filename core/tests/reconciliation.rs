/// Optimistic send tests
/// Insert, confirm and roll back through the client against the in-memory gateway

extern crate parley_core;

use chrono::DateTime;
use parley_core::chat_types::{ClientEvent, FetchStatus, Message};
use parley_core::coordinator::SendOutcome;
use parley_core::fake_gateway::FakeGateway;
use parley_core::{ChatClient, ChatError, Config};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn message(id: &str, conversation_id: &str, ms: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: conversation_id.to_string(),
        text: format!("text {}", id),
        created_at: DateTime::from_timestamp_millis(ms).unwrap(),
    }
}

fn client_with(gateway: Arc<FakeGateway>) -> ChatClient {
    ChatClient::new(Config::default(), gateway)
}

#[tokio::test]
async fn test_optimistic_send_is_visible_then_confirmed() {
    let gateway = Arc::new(FakeGateway::new().with_held_sends());
    let client = client_with(gateway.clone());
    client.refresh_messages("7").await.unwrap();

    let ticket = client.send("7", "hello").await.unwrap().unwrap();
    let temp_id = ticket.handle().temp_id().to_string();

    // Server has not answered yet
    let view = client.observe_messages("7").await;
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, temp_id);
    assert_eq!(view.messages[0].text, "hello");
    assert_eq!(view.messages[0].sender_id, "me");
    assert_eq!(client.observe_latest("7").await.unwrap().message_id, temp_id);

    gateway.release_sends(1);
    let SendOutcome::Confirmed { confirmed_id, .. } = ticket.outcome().await.unwrap() else {
        panic!("send should confirm");
    };
    assert!(confirmed_id.starts_with("101-"));

    let messages = client.cache().messages("7").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, confirmed_id);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(
        client.projection().get("7").await.unwrap().message_id,
        confirmed_id
    );
}

#[tokio::test]
async fn test_failed_send_restores_cache_and_preview() {
    let gateway = Arc::new(FakeGateway::with_data(vec![], vec![message("1", "7", 1_000)]));
    let client = client_with(gateway.clone());
    client.refresh_messages("7").await.unwrap();

    let first = client.send_and_wait("7", "first").await.unwrap().unwrap();
    assert!(first.is_confirmed());
    let messages_before = client.cache().messages("7").await;
    let latest_before = client.projection().get("7").await;

    gateway
        .fail_next_sends(vec![ChatError::Network("offline".into())])
        .await;
    let outcome = client.send_and_wait("7", "second").await.unwrap().unwrap();

    assert!(matches!(outcome.error(), Some(ChatError::Network(_))));
    assert_eq!(client.cache().messages("7").await, messages_before);
    assert_eq!(client.projection().get("7").await, latest_before);
    assert_eq!(client.observe_latest("7").await.unwrap().text, "first");
}

#[tokio::test]
async fn test_failed_send_is_reported_on_event_channel() {
    let gateway = Arc::new(FakeGateway::new());
    let client = client_with(gateway.clone());
    let mut events = client.subscribe();

    gateway
        .fail_next_sends(vec![ChatError::Validation("Missing field: body".into())])
        .await;
    let outcome = client.send_and_wait("7", "nope").await.unwrap().unwrap();
    let SendOutcome::RolledBack { temp_id, .. } = outcome else {
        panic!("send should roll back");
    };

    let mut failed = None;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::SendFailed { temp_id, error, .. } = event {
            failed = Some((temp_id, error));
        }
    }
    let (failed_id, error) = failed.expect("SendFailed event");
    assert_eq!(failed_id, temp_id);
    assert!(error.contains("Missing field"));
}

#[tokio::test]
async fn test_concurrent_sends_keep_order_and_both_confirm() {
    let gateway = Arc::new(FakeGateway::new().with_held_sends());
    let client = client_with(gateway.clone());
    client.refresh_messages("7").await.unwrap();

    let a = client.send("7", "a").await.unwrap().unwrap();
    let b = client.send("7", "b").await.unwrap().unwrap();
    let texts: Vec<_> = client
        .cache()
        .messages("7")
        .await
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["a", "b"]);

    gateway.release_sends(2);
    let a = a.outcome().await.unwrap();
    let b = b.outcome().await.unwrap();
    assert!(a.is_confirmed() && b.is_confirmed());

    let messages = client.cache().messages("7").await;
    let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["a", "b"]);
    assert!(messages.iter().all(|m| !m.is_temporary()));
    let ids: HashSet<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids.len(), 2);

    let SendOutcome::Confirmed { confirmed_id, .. } = b else { unreachable!() };
    assert_eq!(client.projection().get("7").await.unwrap().message_id, confirmed_id);
}

#[tokio::test]
async fn test_blank_send_changes_nothing() {
    let gateway = Arc::new(FakeGateway::new());
    let client = client_with(gateway.clone());

    assert!(client.send("7", "   \n\t").await.unwrap().is_none());
    assert!(client.send_and_wait("7", "").await.unwrap().is_none());

    assert!(client.cache().messages("7").await.is_empty());
    assert!(client.projection().get("7").await.is_none());
    assert_eq!(gateway.send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refresh_keeps_pending_optimistic_entry() {
    let gateway = Arc::new(
        FakeGateway::with_data(vec![], vec![message("1", "7", 1_000)]).with_held_sends(),
    );
    let client = client_with(gateway.clone());

    let ticket = client.send("7", "pending").await.unwrap().unwrap();
    let temp_id = ticket.handle().temp_id().to_string();

    let messages = client.refresh_messages("7").await.unwrap();
    let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["1", temp_id.as_str()]);

    gateway.release_sends(1);
    assert!(ticket.outcome().await.unwrap().is_confirmed());
    assert_eq!(client.cache().messages("7").await.len(), 2);
}

#[tokio::test]
async fn test_send_drops_refresh_already_in_flight() {
    let gateway = Arc::new(
        FakeGateway::with_data(vec![], vec![message("1", "7", 1_000)])
            .with_fetch_delay(Duration::from_millis(100))
            .with_held_sends(),
    );
    let client = client_with(gateway.clone());

    // Starts a background refresh
    let view = client.observe_messages("7").await;
    assert_eq!(view.status, FetchStatus::Loading);

    let ticket = client.send("7", "racing").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = client.cache().messages("7").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, ticket.handle().temp_id());

    // The next refresh is unaffected
    let messages = client.refresh_messages("7").await.unwrap();
    assert_eq!(messages.len(), 2);
    gateway.release_sends(1);
    assert!(ticket.outcome().await.unwrap().is_confirmed());
}

#[tokio::test]
async fn test_refresh_failure_keeps_cached_messages() {
    let gateway = Arc::new(FakeGateway::with_data(vec![], vec![message("1", "7", 1_000)]));
    let client = client_with(gateway.clone());
    let mut events = client.subscribe();
    client.refresh_messages("7").await.unwrap();

    gateway
        .set_fetch_failure(Some(ChatError::Network("timeout".into())))
        .await;
    let err = client.refresh_messages("7").await.unwrap_err();
    assert!(err.is_retryable());

    let view = client.observe_messages("7").await;
    assert_eq!(view.messages.len(), 1);
    assert!(matches!(view.status, FetchStatus::Error(_)));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event, ClientEvent::RefreshFailed { .. });
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_request() {
    let gateway = Arc::new(
        FakeGateway::with_data(vec![], vec![message("1", "7", 1_000)])
            .with_fetch_delay(Duration::from_millis(50)),
    );
    let client = client_with(gateway.clone());

    let (a, b) = tokio::join!(client.refresh_messages("7"), client.refresh_messages("7"));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(gateway.message_calls_for("7").await, 1);
}

#[tokio::test]
async fn test_send_to_blocked_conversation_is_rejected() {
    let gateway = Arc::new(FakeGateway::new());
    let client = client_with(gateway.clone());
    client.blocklist().block("7").await;

    let err = client.send("7", "hi").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(client.cache().messages("7").await.is_empty());
    assert_eq!(gateway.send_calls.load(Ordering::SeqCst), 0);

    client.blocklist().unblock("7").await;
    assert!(client.send_and_wait("7", "hi").await.unwrap().unwrap().is_confirmed());
}

#[tokio::test]
async fn test_repeated_server_id_still_yields_unique_ids() {
    let gateway = Arc::new(FakeGateway::new().with_fixed_server_id("1"));
    let client = client_with(gateway.clone());

    for text in ["one", "two", "three"] {
        assert!(client.send_and_wait("7", text).await.unwrap().unwrap().is_confirmed());
    }
    let messages = client.cache().messages("7").await;
    let ids: HashSet<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| id.starts_with("1-")));
}

#[tokio::test]
async fn test_refresh_between_server_store_and_ack_does_not_duplicate() {
    let gateway = Arc::new(FakeGateway::new().with_late_acks());
    let client = client_with(gateway.clone());
    client.refresh_messages("7").await.unwrap();

    let ticket = client.send("7", "hello").await.unwrap().unwrap();
    while gateway.sent.lock().await.is_empty() {
        tokio::task::yield_now().await;
    }

    // Server copy and pending entry side by side until the answer arrives
    let messages = client.refresh_messages("7").await.unwrap();
    assert_eq!(messages.len(), 2);

    gateway.release_sends(1);
    let SendOutcome::Confirmed { confirmed_id, .. } = ticket.outcome().await.unwrap() else {
        panic!("send should confirm");
    };
    assert_eq!(confirmed_id, "101");

    let messages = client.cache().messages("7").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "101");
    assert_eq!(messages[0].text, "hello");
    assert_eq!(client.observe_latest("7").await.unwrap().message_id, "101");
}
