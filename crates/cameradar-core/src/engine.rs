use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{DictionaryError, EngineError};
use crate::stream::Stream;

/// Options for a discovery run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoverOptions {
    /// Scan timing preset, 0 (paranoid) to 5 (insane).
    pub speed: u8,
    /// Let the engine write its own scan output to stdout.
    pub logging: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            speed: 4,
            logging: false,
        }
    }
}

/// Options for one attack pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttackOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub logging: bool,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            logging: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    Routes,
    Credentials,
}

impl DictionaryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Routes => "routes",
            Self::Credentials => "credentials",
        }
    }
}

/// Reference to an externally stored dictionary. Its format belongs to the
/// engine; only the location travels through this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    pub kind: DictionaryKind,
    pub path: PathBuf,
}

impl Dictionary {
    pub fn routes(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: DictionaryKind::Routes,
            path: path.into(),
        }
    }

    pub fn credentials(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: DictionaryKind::Credentials,
            path: path.into(),
        }
    }

    /// Confirm the store exists and can be opened.
    pub fn resolve(self) -> Result<Self, DictionaryError> {
        check_readable(&self.path)?;
        Ok(self)
    }
}

fn check_readable(path: &Path) -> Result<(), DictionaryError> {
    if !path.exists() {
        return Err(DictionaryError::NotFound(path.to_path_buf()));
    }
    std::fs::File::open(path).map_err(|source| DictionaryError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// The route and credential dictionaries, resolved once at start-up and
/// shared by every attack pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dictionaries {
    pub routes: Dictionary,
    pub credentials: Dictionary,
}

impl Dictionaries {
    pub fn load(
        routes: impl Into<PathBuf>,
        credentials: impl Into<PathBuf>,
    ) -> Result<Self, DictionaryError> {
        Ok(Self {
            routes: Dictionary::routes(routes).resolve()?,
            credentials: Dictionary::credentials(credentials).resolve()?,
        })
    }

    /// Build without touching the filesystem.
    pub fn unchecked(routes: impl Into<PathBuf>, credentials: impl Into<PathBuf>) -> Self {
        Self {
            routes: Dictionary::routes(routes),
            credentials: Dictionary::credentials(credentials),
        }
    }
}

/// The camera discovery/attack engine.
///
/// Both operations are long-running. Callers in this workspace never invoke
/// an engine concurrently with itself.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    async fn discover(
        &self,
        target: &str,
        ports: &[u16],
        options: &DiscoverOptions,
    ) -> Result<Vec<Stream>, EngineError>;

    async fn attack(
        &self,
        streams: Vec<Stream>,
        dictionary: &Dictionary,
        options: &AttackOptions,
    ) -> Result<Vec<Stream>, EngineError>;
}
