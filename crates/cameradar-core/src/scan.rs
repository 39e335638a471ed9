use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, ErrorInfo};
use crate::ids::ConnectionId;
use crate::stream::Stream;

/// How far a scan request goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Find RTSP services only.
    Discover,
    /// Find RTSP services, then brute-force routes and credentials.
    Attack,
    #[default]
    Both,
}

impl ScanMode {
    /// Attack passes always follow discovery: discovery is the only source
    /// of streams, so `Attack` and `Both` run the same steps.
    pub fn requires_attack(self) -> bool {
        matches!(self, Self::Attack | Self::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Attack => "attack",
            Self::Both => "both",
        }
    }
}

/// A decoded client request, bound to the connection that sent it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    pub connection_id: ConnectionId,
    pub target: String,
    pub ports: BTreeSet<u16>,
    pub mode: ScanMode,
}

impl ScanRequest {
    pub fn ports_vec(&self) -> Vec<u16> {
        self.ports.iter().copied().collect()
    }
}

/// The single result produced for a [`ScanRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    pub connection_id: ConnectionId,
    pub target: String,
    pub streams: Vec<Stream>,
    pub error: Option<ErrorInfo>,
}

impl ScanResult {
    pub fn success(connection_id: ConnectionId, target: impl Into<String>, streams: Vec<Stream>) -> Self {
        Self {
            connection_id,
            target: target.into(),
            streams,
            error: None,
        }
    }

    pub fn failed(connection_id: ConnectionId, target: impl Into<String>, error: &EngineError) -> Self {
        Self {
            connection_id,
            target: target.into(),
            streams: Vec::new(),
            error: Some(ErrorInfo::from(error)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Number of streams with both route and credentials found.
    pub fn accessed_count(&self) -> usize {
        self.streams.iter().filter(|s| s.is_accessed()).count()
    }
}
