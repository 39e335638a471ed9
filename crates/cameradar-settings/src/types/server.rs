//! Server and logging settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// WebSocket server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks an ephemeral port.
    pub port: u16,
    /// Outbound messages buffered per connection before new ones are dropped.
    pub send_queue_capacity: usize,
    /// How long a closing connection may spend flushing its queue.
    pub drain_timeout_ms: u64,
    /// WebSocket ping interval.
    pub heartbeat_interval_ms: u64,
    /// A client silent for this long is disconnected.
    pub client_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
            send_queue_capacity: 64,
            drain_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
        }
    }
}

/// Log output settings. `RUST_LOG` still wins over `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Per-module levels, e.g. `{"cameradar_server": "debug"}`.
    pub modules: BTreeMap<String, String>,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}
