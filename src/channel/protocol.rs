// src/channel/protocol.rs
// Wire messages pushed by the generation server over the duplex channel

use crate::api::{id_from_string_or_number, optional_id_from_string_or_number};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound message envelope, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Progress(ProgressUpdate),
    ChunkCompleted {
        #[serde(deserialize_with = "id_from_string_or_number")]
        chunk_id: String,
        #[serde(default, alias = "duration_seconds")]
        duration: Option<f64>,
    },
    GenerationComplete {
        total_chunks: u32,
        succeeded: u32,
        failed: u32,
        #[serde(default)]
        success_rate: f64,
    },
    Error {
        #[serde(default)]
        error_type: String,
        #[serde(default)]
        error_message: String,
    },
    Heartbeat,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Progress(_) => "progress",
            ServerMessage::ChunkCompleted { .. } => "chunk_completed",
            ServerMessage::GenerationComplete { .. } => "generation_complete",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Heartbeat => "heartbeat",
        }
    }
}

/// Periodic scalar progress report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub current: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "optional_id_from_string_or_number")]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

const KNOWN_TYPES: &[&str] = &[
    "connected",
    "progress",
    "chunk_completed",
    "generation_complete",
    "error",
    "heartbeat",
];

/// Decode one text frame.
///
/// Unknown `type` values are reported separately from malformed payloads so
/// callers can log them at a lower level; neither is fatal.
pub fn parse_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

    if !KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
