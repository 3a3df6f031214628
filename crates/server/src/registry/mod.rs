//! Connection Registry
//!
//! In-memory map from user id to the live delivery channel of that user's
//! session. The channel is the sender half of the session's writer-task
//! queue, so pushing a frame here never touches the network and never
//! blocks; the lock is only ever held for map operations.

use axum::extract::ws::Message;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sender half of a session's outbound queue. Cloneable; the session's
/// writer task owns the matching receiver and the socket sink.
pub type ClientSender = mpsc::UnboundedSender<Message>;

/// One delivery channel per connected user. A reconnect for the same user
/// overwrites the previous entry (last write wins).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ClientSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the delivery channel for `user_id`, replacing any previous one.
    pub fn register(&self, user_id: &str, sender: ClientSender) {
        self.connections.write().insert(user_id.to_string(), sender);
        debug!(user_id = %user_id, "Connection registered");
    }

    /// Remove the mapping for `user_id`, but only if `sender` is still the
    /// registered channel. A session that was replaced by a reconnect must
    /// not evict its successor's channel on the way out.
    pub fn unregister(&self, user_id: &str, sender: &ClientSender) {
        let mut connections = self.connections.write();
        let still_current = connections
            .get(user_id)
            .is_some_and(|current| current.same_channel(sender));
        if still_current {
            connections.remove(user_id);
            debug!(user_id = %user_id, "Connection unregistered");
        }
    }

    /// Serialize `payload` and queue it for delivery to `user_id`.
    ///
    /// Unknown users are skipped silently. A dead channel is logged and
    /// swallowed so one unreachable recipient cannot abort a broadcast.
    pub fn send_json<T: Serialize>(&self, user_id: &str, payload: &T) {
        let sender = self.connections.read().get(user_id).cloned();
        let Some(sender) = sender else {
            return;
        };

        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to serialize outbound payload");
                return;
            }
        };

        if sender.send(Message::Text(text.into())).is_err() {
            warn!(user_id = %user_id, "Dropping frame for dead connection");
        }
    }

    /// Point-in-time membership check.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.read().contains_key(user_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}
