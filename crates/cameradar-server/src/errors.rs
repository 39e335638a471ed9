use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// A client message that cannot become a scan request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("missing target")]
    MissingTarget,
    #[error("ports must not be empty")]
    EmptyPorts,
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),
}

/// A handshake refused before any connection state exists.
#[derive(Debug, thiserror::Error)]
#[error("websocket upgrade rejected ({status}): {reason}")]
pub struct UpgradeError {
    pub status: StatusCode,
    pub reason: String,
}

impl From<WebSocketUpgradeRejection> for UpgradeError {
    fn from(rejection: WebSocketUpgradeRejection) -> Self {
        Self {
            status: rejection.status(),
            reason: rejection.body_text(),
        }
    }
}

impl IntoResponse for UpgradeError {
    fn into_response(self) -> Response {
        (self.status, self.reason).into_response()
    }
}

/// Why a finished result never reached its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryDrop {
    #[error("connection is not registered")]
    UnknownConnection,
    #[error("connection is no longer open")]
    NotOpen,
    #[error("connection send queue is full")]
    QueueFull,
}

impl DeliveryDrop {
    /// Metric label.
    pub fn reason(self) -> &'static str {
        match self {
            Self::UnknownConnection => "unknown_connection",
            Self::NotOpen => "not_open",
            Self::QueueFull => "queue_full",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("scan pipeline is not accepting requests")]
pub struct PipelineClosed;
