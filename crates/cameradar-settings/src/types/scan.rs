//! Scan, dictionary, and engine settings.

use serde::{Deserialize, Serialize};

/// Defaults applied to every scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSettings {
    /// Ports probed when a request does not list any.
    pub default_ports: Vec<u16>,
    /// Discovery speed, 0 (slowest) to 5 (fastest).
    pub speed: u8,
    /// Per-attempt timeout for route and credential attacks.
    pub attack_timeout_ms: u64,
    /// Let the engine write its own progress to stderr.
    pub enable_logs: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            default_ports: vec![554, 8554],
            speed: 4,
            attack_timeout_ms: 2_000,
            enable_logs: false,
        }
    }
}

/// Dictionary file locations. Relative paths resolve against `~/.cameradar`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DictionarySettings {
    pub routes: String,
    pub credentials: String,
}

impl Default for DictionarySettings {
    fn default() -> Self {
        Self {
            routes: "dictionaries/routes".to_string(),
            credentials: "dictionaries/credentials.json".to_string(),
        }
    }
}

/// External engine program invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: "cameradar-engine".to_string(),
            args: Vec::new(),
        }
    }
}
