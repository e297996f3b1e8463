// src/api/http.rs
// reqwest-backed Studio API client

use super::{
    ApiError, Chunk, ExportFormat, ExportOptions, ExportOutcome, MergeOutcome, ProjectInfo,
    StudioApi,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct HttpStudioApi {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkListBody {
    Bare(Vec<Chunk>),
    Wrapped { chunks: Vec<Chunk> },
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_ids: Option<&'a [String]>,
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    format: &'static str,
    #[serde(flatten)]
    options: &'a ExportOptions,
}

impl HttpStudioApi {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| ApiError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!("Studio API client initialized: {}", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    fn url(&self, job_id: &str, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("{}/projects/{}", self.base_url, job_id)
        } else {
            format!("{}/projects/{}/{}", self.base_url, job_id, suffix)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = self.authorize(request).send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(match code {
            401 | 403 => ApiError::AuthenticationError,
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimitError,
            500..=599 => ApiError::ServerError { status: code, body },
            _ => ApiError::Rejected { status: code, body },
        })
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::TimeoutError
    } else {
        ApiError::NetworkError(err.to_string())
    }
}

#[async_trait]
impl StudioApi for HttpStudioApi {
    async fn list_chunks(&self, job_id: &str) -> Result<Vec<Chunk>, ApiError> {
        let response = self.send(self.client.get(self.url(job_id, "chunks"))).await?;
        let body: ChunkListBody = Self::json(response).await?;
        let chunks = match body {
            ChunkListBody::Bare(chunks) => chunks,
            ChunkListBody::Wrapped { chunks } => chunks,
        };
        tracing::debug!("Fetched {} chunks for job {}", chunks.len(), job_id);
        Ok(chunks)
    }

    async fn generate_all(&self, job_id: &str) -> Result<(), ApiError> {
        let body = GenerateRequest { chunk_ids: None };
        self.send(self.client.post(self.url(job_id, "generate")).json(&body))
            .await?;
        tracing::info!("Generation requested for all chunks of job {}", job_id);
        Ok(())
    }

    async fn generate_subset(&self, job_id: &str, chunk_ids: &[String]) -> Result<(), ApiError> {
        let body = GenerateRequest {
            chunk_ids: Some(chunk_ids),
        };
        self.send(self.client.post(self.url(job_id, "generate")).json(&body))
            .await?;
        tracing::info!(
            "Generation requested for {} chunks of job {}",
            chunk_ids.len(),
            job_id
        );
        Ok(())
    }

    async fn merge_audio(&self, job_id: &str) -> Result<MergeOutcome, ApiError> {
        let response = self.send(self.client.post(self.url(job_id, "merge"))).await?;
        Self::json(response).await
    }

    async fn export_audio(
        &self,
        job_id: &str,
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<ExportOutcome, ApiError> {
        let body = ExportRequest {
            format: format.as_str(),
            options,
        };
        let response = self
            .send(self.client.post(self.url(job_id, "export")).json(&body))
            .await?;
        Self::json(response).await
    }

    async fn get_project(&self, job_id: &str) -> Result<ProjectInfo, ApiError> {
        let response = self.send(self.client.get(self.url(job_id, ""))).await?;
        Self::json(response).await
    }
}
