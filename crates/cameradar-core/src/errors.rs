use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Failures reported by the scanning engine or by the adapter that reaches it.
///
/// None of these are fatal to the dispatch pipeline: they become the `error`
/// of the request's result and the next queued request proceeds.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("attack failed: {0}")]
    Attack(String),
    #[error("engine process error: {0}")]
    Process(String),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Attack(_) => "attack",
            Self::Process(_) => "process",
            Self::Protocol(_) => "protocol",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// A dictionary store that could not be resolved at start-up.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryError {
    #[error("dictionary not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("dictionary {} is unreadable: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lightweight error info carried on scan results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&EngineError> for ErrorInfo {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.error_kind().to_string(),
            message: e.to_string(),
        }
    }
}
