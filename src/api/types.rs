// src/api/types.rs
// Collaborator wire types and error definitions

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Generation status of one narration chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "generating")]
    Processing,
    #[serde(alias = "done")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Processing => "processing",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }
}

/// One narration segment as returned by `list_chunks`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    /// Position in playback order, unique and contiguous within a job
    pub order_index: u32,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub instruct: Option<String>,
    pub status: ChunkStatus,
    #[serde(default, alias = "audio_path", alias = "audio_url")]
    pub audio_ref: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_secs: Option<f64>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, order_index: u32, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order_index,
            speaker: String::new(),
            text: text.into(),
            instruct: None,
            status: ChunkStatus::Pending,
            audio_ref: None,
            duration_secs: None,
        }
    }
}

/// Project metadata relevant to merge/export decisions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "audio_path", alias = "merged_audio_path")]
    pub audio_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    #[serde(default, alias = "audio_path", alias = "merged_audio_path")]
    pub audio_ref: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportOutcome {
    #[serde(default, alias = "export_path", alias = "download_url")]
    pub export_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Mp3,
    Wav,
    M4a,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Mp3 => "mp3",
            ExportFormat::Wav => "wav",
            ExportFormat::M4a => "m4a",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "mp3" => Some(ExportFormat::Mp3),
            "wav" => Some(ExportFormat::Wav),
            "m4a" | "aac" => Some(ExportFormat::M4a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub normalize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_silence_ms: Option<u32>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            bitrate_kbps: None,
            include_silence_ms: None,
        }
    }
}

/// Collaborator API errors with retry classification
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    TimeoutError,

    #[error("Authentication failed")]
    AuthenticationError,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimitError,

    #[error("Server error: HTTP {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Request rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Returns true if a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_)
                | ApiError::TimeoutError
                | ApiError::RateLimitError
                | ApiError::ServerError { .. }
        )
    }
}

/// Servers disagree on whether ids are strings or integers
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(i64),
}

impl From<IdRepr> for String {
    fn from(id: IdRepr) -> Self {
        match id {
            IdRepr::Text(text) => text,
            IdRepr::Number(n) => n.to_string(),
        }
    }
}

pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer).map(String::from)
}

pub(crate) fn optional_id_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<IdRepr>::deserialize(deserializer).map(|id| id.map(String::from))
}
