//! Session actor
//!
//! One task per connected client, from registration through the receive
//! loop to cleanup. Splits the socket into a reader half (this task) and a
//! writer task fed by an mpsc channel, so anything in the system can queue
//! frames for this client without touching the socket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::config::AppState;
use crate::models::ErrorReply;
use crate::pipeline::{self, Outcome};
use crate::registry::ClientSender;

/// Server ping cadence; keeps half-open connections from leaking.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a pong before giving up on the peer.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one client session to completion.
///
/// Lifecycle: register the delivery channel, loop over inbound frames one
/// at a time in arrival order, then unregister on close or transport error.
/// A reconnect starts a fresh task; this one never resumes.
pub async fn run(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    state.registry.register(&user_id, tx.clone());

    if let Err(e) = state.directory.set_online(&user_id, true).await {
        warn!(user_id = %user_id, error = %e, "Failed to mark user online");
    }

    info!(
        user_id = %user_id,
        connections = state.registry.connection_count(),
        "Session opened"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Ping task: sends periodic pings and closes the session when the peer
    // stops answering.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the immediate first tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task is gone, so is the connection
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Receive loop: frames from this session are handled strictly one at a
    // time, in arrival order.
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let result = pipeline::handle_inbound(
                    text.as_str(),
                    &user_id,
                    &state.directory,
                    &state.registry,
                )
                .await;

                match result {
                    Ok(Outcome::Delivered(view)) => {
                        // Fan-out already reached every connected participant,
                        // the sender included; no extra acknowledgment here.
                        info!(
                            user_id = %user_id,
                            message_id = %view.id,
                            conversation_id = %view.conversation_id,
                            "Message accepted"
                        );
                    }
                    Ok(Outcome::Rejected(reason)) => send_error(&tx, reason),
                    Ok(Outcome::Malformed) => send_error(&tx, "Invalid JSON format"),
                    Err(e) => {
                        error!(user_id = %user_id, error = %e, "Pipeline failure");
                        send_error(&tx, "Internal server error");
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = tx.send(Message::Pong(data));
            }
            Some(Ok(Message::Pong(_))) => {
                let _ = pong_tx.send(());
            }
            Some(Ok(Message::Binary(_))) => {
                // Text-only protocol
                debug!(user_id = %user_id, "Ignoring binary frame");
            }
            Some(Ok(Message::Close(frame))) => {
                info!(user_id = %user_id, reason = ?frame, "Client closed session");
                break;
            }
            Some(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Closed: no frame is processed past this point
    writer_handle.abort();
    ping_handle.abort();

    // Scoped removal: if a reconnect already replaced our channel, leave it
    state.registry.unregister(&user_id, &tx);

    // Only go offline if no replacement session took over in the meantime
    if !state.registry.is_connected(&user_id) {
        if let Err(e) = state.directory.set_online(&user_id, false).await {
            warn!(user_id = %user_id, error = %e, "Failed to mark user offline");
        }
    }

    info!(user_id = %user_id, "Session closed");
}

/// Forward queued frames to the socket sink until either side goes away.
async fn writer_task(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if ws_sender.send(message).await.is_err() {
            // Connection is broken; the reader loop will notice as well
            break;
        }
    }
}

/// Queue a structured error frame for this session only.
fn send_error(tx: &ClientSender, message: &str) {
    if let Ok(text) = serde_json::to_string(&ErrorReply::new(message)) {
        let _ = tx.send(Message::Text(text.into()));
    }
}
