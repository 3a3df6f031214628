//! Relay server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::directory::DirectoryStore;
use crate::registry::ConnectionRegistry;

/// Configuration for the relay server
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("relay_data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
        }
    }
}

impl RelayConfig {
    /// Build a config from `RELAY_DATA_DIR` and `RELAY_BIND_ADDR`, keeping
    /// the defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var("RELAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let bind_addr = std::env::var("RELAY_BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.bind_addr);

        Self { data_dir, bind_addr }
    }

    /// Create config rooted at a custom data directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers and sessions
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<DirectoryStore>,
    pub registry: Arc<ConnectionRegistry>,
}
