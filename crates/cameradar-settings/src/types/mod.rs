//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file fills the missing fields from the compiled defaults.

mod scan;
mod server;

pub use scan::{DictionarySettings, EngineSettings, ScanSettings};
pub use server::{LoggingSettings, ServerSettings};

use serde::{Deserialize, Serialize};

/// Root settings object, mirroring `~/.cameradar/settings.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameradarSettings {
    pub server: ServerSettings,
    pub scan: ScanSettings,
    pub dictionaries: DictionarySettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}
