use super::context::{JobContext, JobEffect, JobView};
use crate::api::{
    ApiError, Chunk, ExportFormat, ExportOptions, ExportOutcome, MergeOutcome, ProjectInfo,
    StudioApi,
};
use crate::channel::ConnectionHandle;
use crate::ledger::{ChunkPoller, PollResult};
use crate::workflow::{WorkflowRegistry, WorkflowStep};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Requests from the UI (or the CLI) for one job
#[derive(Debug, Clone)]
pub enum JobCommand {
    StartGeneration,
    RetryFailed,
    Merge,
    Export {
        format: ExportFormat,
        options: ExportOptions,
    },
    Reset,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Run until `Shutdown` or the command sender is dropped
    OnCommand,
    /// Also stop once nothing is generating or in flight
    WhenSettled,
}

/// Results of background work. Each carries the lifecycle it was issued in.
enum JobEvent {
    Poll(PollResult),
    Refreshed {
        lifecycle: u64,
        result: Result<Vec<Chunk>, ApiError>,
    },
    Project {
        lifecycle: u64,
        result: Result<ProjectInfo, ApiError>,
    },
    GenerationAccepted {
        lifecycle: u64,
        batch_size: usize,
        result: Result<(), ApiError>,
    },
    MergeFinished {
        lifecycle: u64,
        result: Result<MergeOutcome, ApiError>,
    },
    ExportFinished {
        lifecycle: u64,
        format: ExportFormat,
        result: Result<ExportOutcome, ApiError>,
    },
}

impl JobEvent {
    fn lifecycle(&self) -> Option<u64> {
        match self {
            JobEvent::Poll(_) => None,
            JobEvent::Refreshed { lifecycle, .. }
            | JobEvent::Project { lifecycle, .. }
            | JobEvent::GenerationAccepted { lifecycle, .. }
            | JobEvent::MergeFinished { lifecycle, .. }
            | JobEvent::ExportFinished { lifecycle, .. } => Some(*lifecycle),
        }
    }
}

/// Single-task event loop for one job.
///
/// Channel events, background results and commands are handled one at a
/// time against the `JobContext`, so no state is shared across tasks.
pub struct JobDriver {
    ctx: JobContext,
    api: Arc<dyn StudioApi>,
    connection: ConnectionHandle,
    channel_open: bool,
    poller: ChunkPoller,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events_rx: mpsc::UnboundedReceiver<JobEvent>,
    views: watch::Sender<JobView>,
    in_flight: usize,
    pending_export: Option<(ExportFormat, ExportOptions)>,
    /// Commands received before the first chunk list and project answer
    deferred: VecDeque<JobCommand>,
    load_failed: bool,
}

impl JobDriver {
    pub fn new(
        api: Arc<dyn StudioApi>,
        connection: ConnectionHandle,
        poll_interval: Duration,
        auto_merge: bool,
    ) -> Self {
        let mut ctx = JobContext::new(connection.job_id.clone(), auto_merge);
        ctx.attach(connection.epoch);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (views, _) = watch::channel(ctx.view());

        Self {
            poller: ChunkPoller::new(connection.job_id.clone(), poll_interval),
            ctx,
            api,
            connection,
            channel_open: true,
            events_tx,
            events_rx,
            views,
            in_flight: 0,
            pending_export: None,
            deferred: VecDeque::new(),
            load_failed: false,
        }
    }

    pub fn job_id(&self) -> &str {
        self.ctx.job_id()
    }

    /// Latest view of the job, updated after every handled event
    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.views.subscribe()
    }

    fn is_settled(&self) -> bool {
        (self.ctx.is_loaded() || self.load_failed)
            && !self.ctx.is_generating()
            && !self.ctx.merge_in_flight()
            && self.in_flight == 0
            && self.deferred.is_empty()
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<JobCommand>,
        workflow: &mut WorkflowRegistry,
        stop: StopCondition,
    ) -> JobView {
        tracing::info!("Job {}: driver started", self.job_id());
        self.request_refresh();
        self.request_project();
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                command = commands.recv(), if commands_open => match command {
                    Some(JobCommand::Shutdown) => break,
                    Some(command) if self.ctx.is_loaded() || self.load_failed => {
                        self.handle_command(command, workflow)
                    }
                    Some(command) => {
                        tracing::debug!("Job {}: holding {:?} until the job is loaded", self.job_id(), command);
                        self.deferred.push_back(command);
                    }
                    None => commands_open = false,
                },

                event = self.connection.next_event(), if self.channel_open => match event {
                    Some(event) => {
                        let effects = self.ctx.on_channel_event(&event);
                        self.apply(effects, workflow);
                    }
                    None => self.channel_open = false,
                },

                Some(event) = self.events_rx.recv() => self.handle_event(event, workflow),
            }

            while self.ctx.is_loaded() {
                let Some(command) = self.deferred.pop_front() else {
                    break;
                };
                self.handle_command(command, workflow);
            }
            self.maybe_export();
            self.views.send_replace(self.ctx.view());

            if stop == StopCondition::OnCommand && !commands_open && self.deferred.is_empty() {
                break;
            }

            if stop == StopCondition::WhenSettled && self.is_settled() {
                if let Some((format, _)) = self.pending_export.take() {
                    tracing::warn!(
                        "Job {}: no merged audio, skipping {} export",
                        self.job_id(),
                        format.as_str()
                    );
                }
                break;
            }
        }

        self.poller.stop();
        tracing::info!("Job {}: driver stopped", self.job_id());
        self.ctx.view()
    }

    fn handle_command(&mut self, command: JobCommand, workflow: &mut WorkflowRegistry) {
        let job_id = self.job_id().to_string();
        match command {
            JobCommand::StartGeneration => {
                if !workflow.can_proceed(&job_id, WorkflowStep::GenerateAudio) {
                    tracing::warn!(
                        "Job {}: generating before {:?} are done",
                        job_id,
                        workflow.state(&job_id).missing_for(WorkflowStep::GenerateAudio)
                    );
                }
                if let Err(e) = workflow.advance(&job_id, WorkflowStep::GenerateAudio) {
                    tracing::warn!("Job {}: {}", job_id, e);
                }

                let batch_size = self.ctx.ledger().chunks().len();
                let api = self.api.clone();
                let lifecycle = self.ctx.lifecycle();
                self.spawn_request(async move {
                    JobEvent::GenerationAccepted {
                        lifecycle,
                        batch_size,
                        result: api.generate_all(&job_id).await,
                    }
                });
            }
            JobCommand::RetryFailed => {
                let failed = self.ctx.failed_chunk_ids();
                if failed.is_empty() {
                    tracing::info!("Job {}: no failed chunks to retry", job_id);
                    return;
                }
                tracing::info!("Job {}: retrying {} failed chunks", job_id, failed.len());

                let api = self.api.clone();
                let lifecycle = self.ctx.lifecycle();
                self.spawn_request(async move {
                    JobEvent::GenerationAccepted {
                        lifecycle,
                        batch_size: failed.len(),
                        result: api.generate_subset(&job_id, &failed).await,
                    }
                });
            }
            JobCommand::Merge => {
                let effects = self.ctx.request_manual_merge();
                if effects.is_empty() {
                    tracing::info!("Job {}: merge already running or nothing to merge", job_id);
                }
                self.apply(effects, workflow);
            }
            JobCommand::Export { format, options } => {
                if self.ctx.audio_ref().is_none() {
                    tracing::info!(
                        "Job {}: {} export waits for merged audio",
                        job_id,
                        format.as_str()
                    );
                }
                self.pending_export = Some((format, options));
            }
            JobCommand::Reset => {
                self.load_failed = false;
                let effects = self.ctx.reset();
                self.apply(effects, workflow);
                self.pending_export = None;
                self.request_refresh();
                self.request_project();
            }
            JobCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: JobEvent, workflow: &mut WorkflowRegistry) {
        if let Some(lifecycle) = event.lifecycle() {
            self.in_flight = self.in_flight.saturating_sub(1);
            if lifecycle != self.ctx.lifecycle() {
                tracing::debug!("Job {}: dropping result from before reset", self.job_id());
                return;
            }
        }

        let effects = match event {
            JobEvent::Poll(poll) => {
                if poll.generation != self.poller.generation() {
                    tracing::debug!(
                        "Job {}: dropping poll from generation {}",
                        poll.job_id,
                        poll.generation
                    );
                    return;
                }
                match poll.result {
                    Ok(chunks) => self.ctx.on_chunks_pulled(chunks),
                    Err(_) => Vec::new(),
                }
            }
            JobEvent::Refreshed { result, .. } => match result {
                Ok(chunks) => self.ctx.on_chunks_pulled(chunks),
                Err(e) => self.record_load_failure("Chunk refresh", e),
            },
            JobEvent::Project { result, .. } => match result {
                Ok(info) => self.ctx.on_project(info),
                Err(e) => self.record_load_failure("Project lookup", e),
            },
            JobEvent::GenerationAccepted {
                batch_size, result, ..
            } => match result {
                Ok(()) => {
                    tracing::info!("Job {}: generation accepted for {} chunks", self.job_id(), batch_size);
                    self.ctx.begin_generation(batch_size)
                }
                Err(e) => self.record_failure("Generation request", e),
            },
            JobEvent::MergeFinished { result, .. } => self.ctx.on_merge_finished(result),
            JobEvent::ExportFinished { format, result, .. } => match result {
                Ok(outcome) => {
                    tracing::info!(
                        "Job {}: {} export ready at {}",
                        self.job_id(),
                        format.as_str(),
                        outcome.export_ref.as_deref().unwrap_or("(server default)")
                    );
                    self.ctx.on_export_finished(outcome.export_ref)
                }
                Err(e) => self.record_failure("Export", e),
            },
        };
        self.apply(effects, workflow);
    }

    fn record_failure(&mut self, what: &str, error: ApiError) -> Vec<JobEffect> {
        tracing::warn!("Job {}: {} failed: {}", self.job_id(), what, error);
        self.ctx.record_error(format!("{} failed: {}", what, error));
        Vec::new()
    }

    /// Held commands cannot run against a job that never loaded.
    fn record_load_failure(&mut self, what: &str, error: ApiError) -> Vec<JobEffect> {
        if !self.ctx.is_loaded() {
            self.load_failed = true;
            if !self.deferred.is_empty() {
                tracing::warn!(
                    "Job {}: dropping {} held commands, job did not load",
                    self.job_id(),
                    self.deferred.len()
                );
                self.deferred.clear();
            }
        }
        self.record_failure(what, error)
    }

    fn apply(&mut self, effects: Vec<JobEffect>, workflow: &mut WorkflowRegistry) {
        for effect in effects {
            match effect {
                JobEffect::StartPolling => {
                    let tx = self.events_tx.clone();
                    self.poller.start(self.api.clone(), move |poll| {
                        let _ = tx.send(JobEvent::Poll(poll));
                    });
                }
                JobEffect::StopPolling => self.poller.stop(),
                JobEffect::RequestRefresh => self.request_refresh(),
                JobEffect::RequestProject => self.request_project(),
                JobEffect::RequestMerge => self.request_merge(),
                JobEffect::StepCompleted(step) => self.complete_step(step, workflow),
            }
        }
    }

    fn complete_step(&self, step: WorkflowStep, workflow: &mut WorkflowRegistry) {
        let job_id = self.job_id();
        if let Err(e) = workflow.mark_complete(job_id, step) {
            tracing::warn!("Job {}: {}", job_id, e);
            return;
        }
        if step == WorkflowStep::ExportAudio && workflow.can_proceed(job_id, WorkflowStep::Completed) {
            let finished = workflow
                .advance(job_id, WorkflowStep::Completed)
                .and_then(|_| workflow.mark_complete(job_id, WorkflowStep::Completed));
            if let Err(e) = finished {
                tracing::warn!("Job {}: {}", job_id, e);
            }
        }
    }

    fn maybe_export(&mut self) {
        if self.ctx.audio_ref().is_none() || self.ctx.merge_in_flight() {
            return;
        }
        let Some((format, options)) = self.pending_export.take() else {
            return;
        };

        let api = self.api.clone();
        let job_id = self.job_id().to_string();
        let lifecycle = self.ctx.lifecycle();
        tracing::info!("Job {}: exporting {}", job_id, format.as_str());
        self.spawn_request(async move {
            JobEvent::ExportFinished {
                lifecycle,
                format,
                result: api.export_audio(&job_id, format, &options).await,
            }
        });
    }

    fn request_refresh(&mut self) {
        let api = self.api.clone();
        let job_id = self.job_id().to_string();
        let lifecycle = self.ctx.lifecycle();
        self.spawn_request(async move {
            JobEvent::Refreshed {
                lifecycle,
                result: api.list_chunks(&job_id).await,
            }
        });
    }

    fn request_project(&mut self) {
        let api = self.api.clone();
        let job_id = self.job_id().to_string();
        let lifecycle = self.ctx.lifecycle();
        self.spawn_request(async move {
            JobEvent::Project {
                lifecycle,
                result: api.get_project(&job_id).await,
            }
        });
    }

    fn request_merge(&mut self) {
        let api = self.api.clone();
        let job_id = self.job_id().to_string();
        let lifecycle = self.ctx.lifecycle();
        tracing::info!("Job {}: requesting merged audio", job_id);
        self.spawn_request(async move {
            JobEvent::MergeFinished {
                lifecycle,
                result: api.merge_audio(&job_id).await,
            }
        });
    }

    fn spawn_request<F>(&mut self, request: F)
    where
        F: Future<Output = JobEvent> + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }
}
