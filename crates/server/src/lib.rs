//! Messenger Relay Server Library
//!
//! Real-time message relay: clients hold a WebSocket session keyed by user
//! id, and accepted messages fan out to every connected participant of the
//! addressed conversation, backed by a SQLite directory store.

pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod session;

use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{AppState, RelayConfig};
use directory::DirectoryStore;
use handlers::{get_conversation_messages, health_check, ws_upgrade};
use registry::ConnectionRegistry;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Messenger Relay Server ===");

    let config = RelayConfig::from_env();
    config.ensure_dirs().await?;
    info!("Data directory: {:?}", config.data_dir);

    let directory = Arc::new(DirectoryStore::new(&config.data_dir).await?);
    let registry = Arc::new(ConnectionRegistry::new());
    info!("Connection registry initialized");

    let app_state = AppState { directory, registry };
    let app = router(app_state);

    info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{user_id}", get(ws_upgrade))
        .route(
            "/conversations/{conversation_id}/messages",
            get(get_conversation_messages),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
