//! End-to-end pipeline tests: a real SQLite directory store, a live
//! connection registry, and raw JSON frames going through handle_inbound.

use axum::extract::ws::Message;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use server::directory::DirectoryStore;
use server::models::UserProfile;
use server::pipeline::{self, Outcome};
use server::registry::ConnectionRegistry;

async fn setup() -> (TempDir, DirectoryStore, ConnectionRegistry) {
    let dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(dir.path()).await.unwrap();
    (dir, store, ConnectionRegistry::new())
}

async fn seed_user(store: &DirectoryStore, id: &str) {
    store
        .create_user(&UserProfile {
            id: id.to_string(),
            username: Some(format!("{}-name", id)),
            ..Default::default()
        })
        .await
        .unwrap();
}

/// Register a fresh channel for `user_id` and hand back the receiving end.
fn connect(registry: &ConnectionRegistry, user_id: &str) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    registry.register(user_id, tx);
    rx
}

/// Pop the next queued frame as JSON, if any.
fn next_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Value> {
    match rx.try_recv().ok()? {
        Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_fan_out_reaches_connected_participants_only() {
    let (_dir, store, registry) = setup().await;
    for id in ["u1", "u2", "u3"] {
        seed_user(&store, id).await;
    }
    let conversation = store.create_conversation("u1", "group", None).await.unwrap();
    store.add_participant(&conversation.id, "u2").await.unwrap();
    store.add_participant(&conversation.id, "u3").await.unwrap();

    let mut rx_u1 = connect(&registry, "u1");
    let mut rx_u2 = connect(&registry, "u2");
    // u3 stays disconnected

    let raw = format!(
        r#"{{"conversation_id":"{}","content":"hi","type":"text"}}"#,
        conversation.id
    );
    let outcome = pipeline::handle_inbound(&raw, "u1", &store, &registry)
        .await
        .unwrap();

    let view = match outcome {
        Outcome::Delivered(view) => view,
        other => panic!("expected Delivered, got {:?}", other),
    };
    assert_eq!(view.content, "hi");

    // The sender is an ordinary recipient; u3's absence raises nothing
    let frame_u1 = next_frame(&mut rx_u1).expect("u1 should receive the frame");
    let frame_u2 = next_frame(&mut rx_u2).expect("u2 should receive the frame");
    assert_eq!(frame_u1["id"], view.id.as_str());
    assert_eq!(frame_u2["sender_id"], "u1");
    assert_eq!(frame_u2["status"], 1);
    assert_eq!(frame_u2["username"], "u1-name");
    assert!(next_frame(&mut rx_u1).is_none());
    assert!(next_frame(&mut rx_u2).is_none());
}

#[tokio::test]
async fn test_blocked_sender_persists_nothing_and_reaches_nobody() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "owner").await;
    seed_user(&store, "member").await;
    let conversation = store
        .create_conversation("owner", "group", None)
        .await
        .unwrap();
    store.add_participant(&conversation.id, "member").await.unwrap();
    store.block_user("owner", "member").await.unwrap();

    let mut rx_owner = connect(&registry, "owner");
    let mut rx_member = connect(&registry, "member");

    let raw = format!(r#"{{"conversation_id":"{}","content":"hi"}}"#, conversation.id);
    let outcome = pipeline::handle_inbound(&raw, "member", &store, &registry)
        .await
        .unwrap();

    match outcome {
        Outcome::Rejected(reason) => assert!(reason.contains("blocked")),
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert!(store.list_messages(&conversation.id).await.unwrap().is_empty());
    assert!(next_frame(&mut rx_owner).is_none());
    assert!(next_frame(&mut rx_member).is_none());
}

#[tokio::test]
async fn test_owner_level_block_does_not_filter_recipients() {
    // Owner u1 blocks u3. A send from u2 is still allowed, and u3 still
    // receives it as a recipient; only sender-vs-owner is checked.
    let (_dir, store, registry) = setup().await;
    for id in ["u1", "u2", "u3"] {
        seed_user(&store, id).await;
    }
    let conversation = store.create_conversation("u1", "group", None).await.unwrap();
    store.add_participant(&conversation.id, "u2").await.unwrap();
    store.add_participant(&conversation.id, "u3").await.unwrap();
    store.block_user("u1", "u3").await.unwrap();

    let mut rx_u1 = connect(&registry, "u1");
    let mut rx_u2 = connect(&registry, "u2");
    let mut rx_u3 = connect(&registry, "u3");

    let raw = format!(r#"{{"conversation_id":"{}","content":"hi"}}"#, conversation.id);
    let outcome = pipeline::handle_inbound(&raw, "u2", &store, &registry)
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Delivered(_)));
    assert!(next_frame(&mut rx_u1).is_some());
    assert!(next_frame(&mut rx_u2).is_some());
    assert!(next_frame(&mut rx_u3).is_some());
}

#[tokio::test]
async fn test_non_participant_send_is_rejected() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "owner").await;
    seed_user(&store, "outsider").await;
    let conversation = store
        .create_conversation("owner", "group", None)
        .await
        .unwrap();

    let mut rx_owner = connect(&registry, "owner");

    let raw = format!(r#"{{"conversation_id":"{}","content":"hi"}}"#, conversation.id);
    let outcome = pipeline::handle_inbound(&raw, "outsider", &store, &registry)
        .await
        .unwrap();

    match outcome {
        Outcome::Rejected(reason) => assert_eq!(reason, "Not a participant in this conversation"),
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert!(store.list_messages(&conversation.id).await.unwrap().is_empty());
    assert!(next_frame(&mut rx_owner).is_none());
}

#[tokio::test]
async fn test_bad_frames_touch_neither_store_nor_registry() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "u1").await;
    let conversation = store.create_conversation("u1", "group", None).await.unwrap();
    let mut rx_u1 = connect(&registry, "u1");

    let outcome = pipeline::handle_inbound("{ not json", "u1", &store, &registry)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Malformed));

    let outcome = pipeline::handle_inbound(r#"{"content":"hi"}"#, "u1", &store, &registry)
        .await
        .unwrap();
    match outcome {
        Outcome::Rejected(reason) => assert_eq!(reason, "Missing required fields"),
        other => panic!("expected Rejected, got {:?}", other),
    }

    assert!(store.list_messages(&conversation.id).await.unwrap().is_empty());
    assert!(next_frame(&mut rx_u1).is_none());
}

#[tokio::test]
async fn test_unknown_conversation_is_rejected() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "u1").await;

    let outcome =
        pipeline::handle_inbound(r#"{"conversation_id":"missing"}"#, "u1", &store, &registry)
            .await
            .unwrap();

    match outcome {
        Outcome::Rejected(reason) => assert_eq!(reason, "Not a participant in this conversation"),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_enrichment_survives_an_absent_sender_profile() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "owner").await;
    let conversation = store
        .create_conversation("owner", "group", None)
        .await
        .unwrap();
    // Membership without a user row
    store.add_participant(&conversation.id, "ghost").await.unwrap();

    let mut rx_owner = connect(&registry, "owner");

    let raw = format!(r#"{{"conversation_id":"{}","content":"boo"}}"#, conversation.id);
    let outcome = pipeline::handle_inbound(&raw, "ghost", &store, &registry)
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Delivered(_)));
    let frame = next_frame(&mut rx_owner).expect("owner should receive the frame");
    assert_eq!(frame["sender_id"], "ghost");
    assert!(frame["username"].is_null());
    assert!(frame["first_name"].is_null());
}

#[tokio::test]
async fn test_identical_payloads_are_never_deduplicated() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "u1").await;
    let conversation = store.create_conversation("u1", "group", None).await.unwrap();

    let raw = format!(r#"{{"conversation_id":"{}","content":"hi"}}"#, conversation.id);
    let first = pipeline::handle_inbound(&raw, "u1", &store, &registry)
        .await
        .unwrap();
    let second = pipeline::handle_inbound(&raw, "u1", &store, &registry)
        .await
        .unwrap();

    let (first, second) = match (first, second) {
        (Outcome::Delivered(a), Outcome::Delivered(b)) => (a, b),
        other => panic!("expected two Delivered outcomes, got {:?}", other),
    };
    assert_ne!(first.id, second.id);
    assert!(second.created_at >= first.created_at);
    assert_eq!(store.list_messages(&conversation.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_attachment_reference_rides_along() {
    let (_dir, store, registry) = setup().await;
    seed_user(&store, "u1").await;
    let conversation = store.create_conversation("u1", "group", None).await.unwrap();
    let mut rx_u1 = connect(&registry, "u1");

    let raw = format!(
        r#"{{"conversation_id":"{}","content":"","type":"image","image_key":"blob-42"}}"#,
        conversation.id
    );
    let outcome = pipeline::handle_inbound(&raw, "u1", &store, &registry)
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Delivered(_)));
    let frame = next_frame(&mut rx_u1).unwrap();
    assert_eq!(frame["type"], "image");
    assert_eq!(frame["image_key"], "blob-42");

    let history = store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(history[0].image_key.as_deref(), Some("blob-42"));
}
