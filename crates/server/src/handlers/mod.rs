//! HTTP surface: WebSocket upgrade, message history, health check.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::{Json, Response},
};
use tracing::info;

use crate::config::AppState;
use crate::error::{Error, Result};
use crate::models::StoredMessage;
use crate::session;

/// GET /ws/{user_id}
///
/// Upgrade to a WebSocket session for `user_id`. Verifying that the caller
/// really is `user_id` belongs to the fronting auth layer, not to the relay.
pub async fn ws_upgrade(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    info!(user_id = %user_id, "WebSocket connection requested");
    ws.on_upgrade(move |socket| session::run(socket, state, user_id))
}

/// GET /conversations/{conversation_id}/messages
///
/// Message history for a conversation, oldest first.
pub async fn get_conversation_messages(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredMessage>>> {
    if state
        .directory
        .find_conversation(&conversation_id)
        .await?
        .is_none()
    {
        return Err(Error::ConversationNotFound);
    }

    let messages = state.directory.list_messages(&conversation_id).await?;
    Ok(Json(messages))
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK - Messenger Relay Server"
}
