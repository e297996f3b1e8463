use crate::api::{ApiError, Chunk, ChunkStatus, MergeOutcome, ProjectInfo};
use crate::channel::{ChannelEvent, ChannelEventKind, ConnectionStatus, ServerMessage};
use crate::ledger::{ChunkFields, ChunkLedger, ChunkStats};
use crate::merge::{AutoMergeGuard, MergeDecision};
use crate::progress::{self, ChannelState, JobStatus, ProgressSnapshot};
use crate::workflow::WorkflowStep;
use serde::Serialize;

/// Side effects a state transition asks the driver to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEffect {
    StartPolling,
    StopPolling,
    RequestRefresh,
    RequestProject,
    RequestMerge,
    StepCompleted(WorkflowStep),
}

/// Read-only view handed to UI consumers
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub progress: ProgressSnapshot,
    pub stats: ChunkStats,
    pub chunks: Vec<Chunk>,
    pub audio_ref: Option<String>,
    pub export_ref: Option<String>,
    pub is_generating: bool,
    pub merge_in_flight: bool,
    pub duration_revision: u64,
}

/// Everything the client knows about one job.
///
/// Mutated only through the methods below, each of which runs to
/// completion and returns the effects to carry out. `lifecycle` changes on
/// `reset` so responses to requests issued before it can be dropped.
pub struct JobContext {
    job_id: String,
    lifecycle: u64,
    epoch: Option<u64>,
    progress: ProgressSnapshot,
    ledger: ChunkLedger,
    audio_ref: Option<String>,
    export_ref: Option<String>,
    project_loaded: bool,
    is_generating: bool,
    polling: bool,
    auto_merge: bool,
    merge_guard: AutoMergeGuard,
    merge_in_flight: bool,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, auto_merge: bool) -> Self {
        let job_id = job_id.into();
        Self {
            progress: ProgressSnapshot::new(job_id.clone()),
            ledger: ChunkLedger::new(job_id.clone()),
            job_id,
            lifecycle: 0,
            epoch: None,
            audio_ref: None,
            export_ref: None,
            project_loaded: false,
            is_generating: false,
            polling: false,
            auto_merge,
            merge_guard: AutoMergeGuard::new(),
            merge_in_flight: false,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn lifecycle(&self) -> u64 {
        self.lifecycle
    }

    pub fn progress(&self) -> &ProgressSnapshot {
        &self.progress
    }

    pub fn ledger(&self) -> &ChunkLedger {
        &self.ledger
    }

    pub fn audio_ref(&self) -> Option<&str> {
        self.audio_ref.as_deref()
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn merge_in_flight(&self) -> bool {
        self.merge_in_flight
    }

    pub fn is_loaded(&self) -> bool {
        self.project_loaded && self.ledger.refreshed_at().is_some()
    }

    /// Accept events from this connection epoch only.
    pub fn attach(&mut self, epoch: u64) {
        self.epoch = Some(epoch);
    }

    pub fn view(&self) -> JobView {
        JobView {
            progress: self.progress.clone(),
            stats: self.ledger.stats(),
            chunks: self.ledger.chunks().to_vec(),
            audio_ref: self.audio_ref.clone(),
            export_ref: self.export_ref.clone(),
            is_generating: self.is_generating,
            merge_in_flight: self.merge_in_flight,
            duration_revision: self.ledger.duration_revision(),
        }
    }

    fn update_progress(&mut self, apply: impl FnOnce(ProgressSnapshot) -> ProgressSnapshot) {
        let current = std::mem::replace(&mut self.progress, ProgressSnapshot::new(self.job_id.clone()));
        self.progress = apply(current);
    }

    pub fn on_channel_event(&mut self, event: &ChannelEvent) -> Vec<JobEffect> {
        if event.job_id != self.job_id || Some(event.epoch) != self.epoch {
            tracing::debug!(
                "Discarding event for job {} epoch {} (current {:?})",
                event.job_id,
                event.epoch,
                self.epoch
            );
            return Vec::new();
        }

        let mut effects = Vec::new();
        match &event.kind {
            ChannelEventKind::Status(status) => {
                self.update_progress(|p| progress::apply_channel_status(p, status));
                // anything may have been missed while the channel was down
                match status {
                    ConnectionStatus::Live { .. } if self.ledger.refreshed_at().is_some() => {
                        effects.push(JobEffect::RequestRefresh);
                    }
                    // the client let go of the job; nothing is followed past this point
                    ConnectionStatus::Closed => {
                        if self.is_generating {
                            tracing::info!("Job {}: channel closed, no longer following the batch", self.job_id);
                        }
                        self.is_generating = false;
                        if self.polling {
                            self.polling = false;
                            effects.push(JobEffect::StopPolling);
                        }
                    }
                    _ => {}
                }
            }
            ChannelEventKind::Message(message) => {
                self.update_progress(|p| progress::reduce(p, message));
                self.apply_message(message, &mut effects);
            }
        }
        effects
    }

    fn apply_message(&mut self, message: &ServerMessage, effects: &mut Vec<JobEffect>) {
        match message {
            ServerMessage::ChunkCompleted { chunk_id, duration } => {
                let fields = ChunkFields {
                    audio_ref: None,
                    duration_secs: *duration,
                };
                self.ledger
                    .apply_push_update(chunk_id, ChunkStatus::Completed, fields);
                self.after_ledger_change(effects);
            }
            ServerMessage::Progress(update) => {
                if let (Some(chunk_id), Some(_)) = (update.chunk_id.as_ref(), update.error.as_ref()) {
                    self.ledger
                        .apply_push_update(chunk_id, ChunkStatus::Failed, ChunkFields::default());
                }
                if !self.is_generating && self.progress.status == JobStatus::Processing {
                    tracing::info!("Job {} is generating server-side, following it", self.job_id);
                    self.is_generating = true;
                    self.ensure_polling(effects);
                }
            }
            ServerMessage::GenerationComplete { failed, .. } => {
                tracing::info!(
                    "Job {}: generation complete ({} failed), reconciling",
                    self.job_id,
                    failed
                );
                self.is_generating = false;
                effects.push(JobEffect::RequestRefresh);
                self.after_ledger_change(effects);
            }
            ServerMessage::Connected { .. } | ServerMessage::Error { .. } | ServerMessage::Heartbeat => {}
        }
    }

    /// Installs a full pull, from the poller or a one-shot refresh.
    pub fn on_chunks_pulled(&mut self, chunks: Vec<Chunk>) -> Vec<JobEffect> {
        let mut effects = Vec::new();
        self.ledger.replace_all(chunks);

        let stats = self.ledger.stats();
        // without a channel there is no generation_complete; settle on the pull
        let channel_gone = matches!(self.progress.channel, ChannelState::Disconnected { .. });
        if self.is_generating && channel_gone && stats.total > 0 && stats.processing == 0 && stats.pending == 0 {
            tracing::info!("Job {}: no live channel, batch settled per chunk list", self.job_id);
            self.is_generating = false;
        }
        if self.polling && !self.is_generating && stats.processing == 0 {
            self.polling = false;
            effects.push(JobEffect::StopPolling);
        }
        self.after_ledger_change(&mut effects);
        effects
    }

    pub fn on_project(&mut self, info: ProjectInfo) -> Vec<JobEffect> {
        let mut effects = Vec::new();
        self.project_loaded = true;
        self.audio_ref = info.audio_ref.filter(|r| !r.is_empty());
        if self.audio_ref.is_some() {
            effects.push(JobEffect::StepCompleted(WorkflowStep::MergeAudio));
        }
        self.evaluate_merge(&mut effects);
        effects
    }

    /// A batch of `batch_size` chunks was accepted by the server.
    pub fn begin_generation(&mut self, batch_size: usize) -> Vec<JobEffect> {
        let mut effects = Vec::new();
        self.update_progress(|p| progress::begin_batch(p, batch_size as u32));
        self.is_generating = true;
        self.audio_ref = None;
        self.export_ref = None;
        self.merge_guard.reset(&self.job_id);
        self.ensure_polling(&mut effects);
        effects
    }

    pub fn on_merge_finished(&mut self, result: Result<MergeOutcome, ApiError>) -> Vec<JobEffect> {
        let mut effects = Vec::new();
        self.merge_in_flight = false;

        match result {
            Ok(outcome) => match outcome.audio_ref.filter(|r| !r.is_empty()) {
                Some(audio_ref) => {
                    tracing::info!("Job {}: merged audio ready at {}", self.job_id, audio_ref);
                    self.audio_ref = Some(audio_ref);
                    effects.push(JobEffect::StepCompleted(WorkflowStep::MergeAudio));
                    self.evaluate_merge(&mut effects);
                }
                None => effects.push(JobEffect::RequestProject),
            },
            Err(e) => {
                tracing::warn!("Job {}: merge failed: {}", self.job_id, e);
                self.progress.last_error = Some(format!("Merge failed: {}", e));
            }
        }
        effects
    }

    pub fn on_export_finished(&mut self, export_ref: Option<String>) -> Vec<JobEffect> {
        self.export_ref = export_ref;
        vec![JobEffect::StepCompleted(WorkflowStep::ExportAudio)]
    }

    /// User-initiated merge. Clears a latch left by a failed auto-merge but
    /// never overlaps a merge already in flight.
    pub fn request_manual_merge(&mut self) -> Vec<JobEffect> {
        if self.merge_in_flight || self.ledger.is_empty() {
            return Vec::new();
        }
        self.merge_guard.reset(&self.job_id);
        self.merge_guard.latch(&self.job_id);
        self.merge_in_flight = true;
        vec![JobEffect::RequestMerge]
    }

    pub fn failed_chunk_ids(&self) -> Vec<String> {
        self.ledger.ids_with_status(ChunkStatus::Failed)
    }

    pub fn record_error(&mut self, message: String) {
        self.progress.last_error = Some(message);
    }

    /// Forgets all job state; responses still in flight become stale.
    pub fn reset(&mut self) -> Vec<JobEffect> {
        let mut effects = Vec::new();
        if self.polling {
            effects.push(JobEffect::StopPolling);
        }
        self.lifecycle += 1;
        self.progress = ProgressSnapshot::new(self.job_id.clone());
        self.ledger.reset();
        self.audio_ref = None;
        self.export_ref = None;
        self.project_loaded = false;
        self.is_generating = false;
        self.polling = false;
        self.merge_guard.reset(&self.job_id);
        self.merge_in_flight = false;
        effects
    }

    fn ensure_polling(&mut self, effects: &mut Vec<JobEffect>) {
        if !self.polling {
            self.polling = true;
            effects.push(JobEffect::StartPolling);
        }
    }

    fn after_ledger_change(&mut self, effects: &mut Vec<JobEffect>) {
        let stats = self.ledger.stats();
        if stats.total > 0 {
            effects.push(JobEffect::StepCompleted(WorkflowStep::CreateChunks));
        }
        if stats.all_completed() {
            effects.push(JobEffect::StepCompleted(WorkflowStep::GenerateAudio));
        }
        self.evaluate_merge(effects);
    }

    fn evaluate_merge(&mut self, effects: &mut Vec<JobEffect>) {
        // merged audio may already exist server-side until the project says otherwise
        if !self.auto_merge || !self.project_loaded || self.merge_in_flight {
            return;
        }
        match self.merge_guard.evaluate(
            &self.job_id,
            &self.ledger,
            self.audio_ref.as_deref(),
            self.is_generating,
        ) {
            MergeDecision::Fire => {
                self.merge_in_flight = true;
                effects.push(JobEffect::RequestMerge);
            }
            MergeDecision::Skip(reason) => {
                tracing::trace!("Job {}: auto-merge skipped ({:?})", self.job_id, reason);
            }
        }
    }
}
