// src/api/mod.rs
// Studio API - the HTTP collaborator the generation core drives

mod http;
mod types;

pub use http::HttpStudioApi;
pub use types::{
    ApiError, Chunk, ChunkStatus, ExportFormat, ExportOptions, ExportOutcome, MergeOutcome,
    ProjectInfo,
};
pub(crate) use types::{id_from_string_or_number, optional_id_from_string_or_number};

use async_trait::async_trait;

/// Operations the core consumes from the narration server.
///
/// Every call is asynchronous and fallible. Side effects are only
/// guaranteed to show up in a later `list_chunks`/`get_project` pull.
#[async_trait]
pub trait StudioApi: Send + Sync {
    /// Full, authoritative chunk list for a job
    async fn list_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, ApiError>;

    /// Start generation for every chunk
    async fn generate_all(&self, job_id: &str) -> Result<(), ApiError>;

    /// Start generation for the given chunk ids only
    async fn generate_subset(&self, job_id: &str, chunk_ids: &[String]) -> Result<(), ApiError>;

    async fn merge_audio(&self, job_id: &str) -> Result<MergeOutcome, ApiError>;

    async fn export_audio(
        &self,
        job_id: &str,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<ExportOutcome, ApiError>;

    async fn get_project(&self, job_id: &str) -> Result<ProjectInfo, ApiError>;
}
