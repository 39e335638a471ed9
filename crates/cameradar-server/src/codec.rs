//! Client and server wire messages.
//!
//! Clients send `{"target": "...", "ports": [...], "mode": "..."}`; the server
//! answers each request with exactly one `result` or `error` event.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cameradar_core::ids::ConnectionId;
use cameradar_core::scan::{ScanMode, ScanRequest, ScanResult};
use cameradar_core::stream::Stream;

use crate::errors::DecodeError;

#[derive(Debug, Deserialize)]
struct ClientMessage {
    target: Option<String>,
    ports: Option<Vec<i64>>,
    #[serde(default)]
    mode: ScanMode,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage<'a> {
    Result { streams: &'a [Stream] },
    Error { message: &'a str },
}

/// Decode one inbound frame into a request bound to `connection_id`.
///
/// `default_ports` applies only when the message has no `ports` field.
pub fn decode(
    bytes: &[u8],
    connection_id: ConnectionId,
    default_ports: &[u16],
) -> Result<ScanRequest, DecodeError> {
    let message: ClientMessage =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let target = message
        .target
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(DecodeError::MissingTarget)?;

    let ports = match message.ports {
        None => default_ports.iter().copied().collect(),
        Some(raw) if raw.is_empty() => return Err(DecodeError::EmptyPorts),
        Some(raw) => raw
            .into_iter()
            .map(|p| match u16::try_from(p) {
                Ok(port) if port != 0 => Ok(port),
                _ => Err(DecodeError::InvalidPort(p)),
            })
            .collect::<Result<BTreeSet<u16>, _>>()?,
    };

    Ok(ScanRequest {
        connection_id,
        target,
        ports,
        mode: message.mode,
    })
}

/// Encode a finished scan as a `result` event, or an `error` event when it failed.
pub fn encode(result: &ScanResult) -> String {
    let message = match &result.error {
        Some(info) => ServerMessage::Error {
            message: &info.message,
        },
        None => ServerMessage::Result {
            streams: &result.streams,
        },
    };
    to_json(&message)
}

/// Standalone `error` event, used for requests that never reached the pipeline.
pub fn encode_error(message: &str) -> String {
    to_json(&ServerMessage::Error { message })
}

fn to_json(message: &ServerMessage<'_>) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to encode server message");
        r#"{"type":"error","message":"internal encoding error"}"#.to_string()
    })
}
