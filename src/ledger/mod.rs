// src/ledger/mod.rs
// Chunk Ledger - the client's authoritative view of a job's chunks

mod poller;

pub use poller::{ChunkPoller, PollResult};

use crate::api::{ApiError, Chunk, ChunkStatus, StudioApi};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counts derived from the ledger on every read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ChunkStats {
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Optional fields carried by an incremental update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFields {
    pub audio_ref: Option<String>,
    pub duration_secs: Option<f64>,
}

pub struct ChunkLedger {
    job_id: String,
    chunks: Vec<Chunk>,
    consistent: bool,
    refreshed_at: Option<DateTime<Utc>>,
    duration_revision: u64,
}

impl ChunkLedger {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            chunks: Vec::new(),
            consistent: true,
            refreshed_at: None,
            duration_revision: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Chunks in playback order
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == chunk_id)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// False when the last pull broke the unique/contiguous `order_index` rule
    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Bumped whenever any chunk duration changes; playback rebuilds on it.
    pub fn duration_revision(&self) -> u64 {
        self.duration_revision
    }

    pub fn stats(&self) -> ChunkStats {
        let mut stats = ChunkStats {
            total: self.chunks.len(),
            ..ChunkStats::default()
        };
        for chunk in &self.chunks {
            match chunk.status {
                ChunkStatus::Pending => stats.pending += 1,
                ChunkStatus::Processing => stats.processing += 1,
                ChunkStatus::Completed => stats.completed += 1,
                ChunkStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn ids_with_status(&self, status: ChunkStatus) -> Vec<String> {
        self.chunks
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.chunks.iter().filter_map(|c| c.duration_secs).sum()
    }

    /// Full pull from the server, replacing local state.
    pub async fn refresh(&mut self, api: &dyn StudioApi) -> Result<&[Chunk], ApiError> {
        let chunks = api.list_chunks(&self.job_id).await?;
        self.replace_all(chunks);
        Ok(&self.chunks)
    }

    /// Installs a full pull. Returns how many chunks changed status.
    pub fn replace_all(&mut self, mut chunks: Vec<Chunk>) -> usize {
        chunks.sort_by_key(|c| c.order_index);

        let changed = chunks
            .iter()
            .filter(|c| self.get(&c.id).map(|old| old.status) != Some(c.status))
            .count();
        let durations_changed = chunks.len() != self.chunks.len()
            || chunks
                .iter()
                .zip(&self.chunks)
                .any(|(new, old)| new.id != old.id || new.duration_secs != old.duration_secs);

        self.consistent = order_is_contiguous(&chunks);
        if !self.consistent {
            tracing::warn!(
                "Job {}: chunk order_index is not unique and contiguous",
                self.job_id
            );
        }

        self.chunks = chunks;
        self.refreshed_at = Some(Utc::now());
        if durations_changed {
            self.duration_revision += 1;
        }

        if changed > 0 {
            tracing::debug!(
                "Job {}: refresh changed {} chunk statuses",
                self.job_id,
                changed
            );
        }
        changed
    }

    /// Best-effort incremental update. Unknown ids are ignored; the next
    /// pull will bring them in.
    pub fn apply_push_update(
        &mut self,
        chunk_id: &str,
        status: ChunkStatus,
        fields: ChunkFields,
    ) -> bool {
        let Some(chunk) = self.chunks.iter_mut().find(|c| c.id == chunk_id) else {
            tracing::debug!(
                "Job {}: push update for unknown chunk {}",
                self.job_id,
                chunk_id
            );
            return false;
        };

        let mut changed = chunk.status != status;
        chunk.status = status;

        if let Some(audio_ref) = fields.audio_ref {
            changed |= chunk.audio_ref.as_deref() != Some(audio_ref.as_str());
            chunk.audio_ref = Some(audio_ref);
        }
        if let Some(duration) = fields.duration_secs.filter(|d| d.is_finite() && *d >= 0.0) {
            if chunk.duration_secs != Some(duration) {
                chunk.duration_secs = Some(duration);
                self.duration_revision += 1;
                changed = true;
            }
        }
        changed
    }

    /// Drops everything; only used when the job itself is reset.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.consistent = true;
        self.refreshed_at = None;
        self.duration_revision += 1;
    }
}

fn order_is_contiguous(sorted: &[Chunk]) -> bool {
    let Some(first) = sorted.first() else {
        return true;
    };
    sorted
        .iter()
        .enumerate()
        .all(|(i, c)| c.order_index == first.order_index + i as u32)
}
