#![allow(dead_code)]

use async_trait::async_trait;
use narration_sync_lib::api::{
    ApiError, Chunk, ChunkStatus, ExportFormat, ExportOptions, ExportOutcome, MergeOutcome,
    ProjectInfo, StudioApi,
};
use narration_sync_lib::channel::{
    ConnectionHandle, ConnectionManager, FrameStream, ReconnectPolicy, Transport, TransportError,
};
use narration_sync_lib::job::{JobCommand, JobDriver, JobView, StopCondition};
use narration_sync_lib::workflow::WorkflowRegistry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Default)]
struct StudioState {
    chunks: Vec<Chunk>,
    audio_ref: Option<String>,
    subsets: Vec<Vec<String>>,
    exports: Vec<ExportFormat>,
    fail_merges: bool,
}

/// In-memory collaborator. Chunk state is whatever the test sets it to.
pub struct FakeStudio {
    state: Mutex<StudioState>,
    hold_merges: AtomicBool,
    merge_gate: Semaphore,
    pub merge_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeStudio {
    pub fn with_chunks(count: usize) -> Arc<Self> {
        let chunks = (0..count)
            .map(|i| Chunk::new(format!("c{}", i + 1), i as u32, format!("Line {} of the narration", i + 1)))
            .collect();
        Arc::new(Self {
            state: Mutex::new(StudioState {
                chunks,
                ..StudioState::default()
            }),
            hold_merges: AtomicBool::new(false),
            merge_gate: Semaphore::new(0),
            merge_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_status(&self, chunk_id: &str, status: ChunkStatus) {
        let mut state = self.state.lock().unwrap();
        let chunk = state
            .chunks
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .expect("unknown chunk");
        chunk.status = status;
        if status == ChunkStatus::Completed {
            chunk.duration_secs = Some(2.0);
            chunk.audio_ref = Some(format!("audio/{}.wav", chunk_id));
        }
    }

    pub fn set_all(&self, status: ChunkStatus) {
        for id in self.chunk_ids() {
            self.set_status(&id, status);
        }
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().chunks.iter().map(|c| c.id.clone()).collect()
    }

    /// Merge calls block until `release_merge`
    pub fn hold_merges(&self) {
        self.hold_merges.store(true, Ordering::SeqCst);
    }

    pub fn release_merge(&self) {
        self.merge_gate.add_permits(1);
    }

    pub fn fail_merges(&self, fail: bool) {
        self.state.lock().unwrap().fail_merges = fail;
    }

    pub fn subsets(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().subsets.clone()
    }

    pub fn exports(&self) -> Vec<ExportFormat> {
        self.state.lock().unwrap().exports.clone()
    }

    pub fn merges(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StudioApi for FakeStudio {
    async fn list_chunks(&self, _job_id: &str) -> Result<Vec<Chunk>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().chunks.clone())
    }

    async fn generate_all(&self, _job_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.audio_ref = None;
        for chunk in state.chunks.iter_mut() {
            if chunk.status != ChunkStatus::Completed {
                chunk.status = ChunkStatus::Processing;
            }
        }
        Ok(())
    }

    async fn generate_subset(&self, _job_id: &str, chunk_ids: &[String]) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.audio_ref = None;
        state.subsets.push(chunk_ids.to_vec());
        for chunk in state.chunks.iter_mut() {
            if chunk_ids.contains(&chunk.id) {
                chunk.status = ChunkStatus::Processing;
            }
        }
        Ok(())
    }

    async fn merge_audio(&self, job_id: &str) -> Result<MergeOutcome, ApiError> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_merges.load(Ordering::SeqCst) {
            self.merge_gate
                .acquire()
                .await
                .map_err(|_| ApiError::NetworkError("gate closed".to_string()))?
                .forget();
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_merges {
            return Err(ApiError::ServerError {
                status: 500,
                body: "merge failed".to_string(),
            });
        }
        let audio_ref = format!("merged/{}.mp3", job_id);
        state.audio_ref = Some(audio_ref.clone());
        let total = state.chunks.iter().filter_map(|c| c.duration_secs).sum();
        Ok(MergeOutcome {
            audio_ref: Some(audio_ref),
            duration_secs: Some(total),
        })
    }

    async fn export_audio(
        &self,
        job_id: &str,
        format: ExportFormat,
        _options: &ExportOptions,
    ) -> Result<ExportOutcome, ApiError> {
        self.state.lock().unwrap().exports.push(format);
        Ok(ExportOutcome {
            export_ref: Some(format!("exports/{}.{}", job_id, format.as_str())),
        })
    }

    async fn get_project(&self, job_id: &str) -> Result<ProjectInfo, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(ProjectInfo {
            id: job_id.to_string(),
            status: "ready".to_string(),
            audio_ref: state.audio_ref.clone(),
        })
    }
}

type Frame = Result<Option<String>, TransportError>;

/// Each `open` takes the next queued session; tests push frames into it.
/// Dropping a session's feed closes it from the server side.
pub struct PushTransport {
    sessions: Mutex<VecDeque<mpsc::UnboundedReceiver<Frame>>>,
    pub opens: AtomicUsize,
}

pub struct SessionFeed(mpsc::UnboundedSender<Frame>);

impl SessionFeed {
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.0.send(Ok(Some(frame.into())));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.0.send(Err(TransportError::Stream(reason.to_string())));
    }
}

impl PushTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn session(&self) -> SessionFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push_back(rx);
        SessionFeed(tx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

struct PushFrames(mpsc::UnboundedReceiver<Frame>);

#[async_trait]
impl FrameStream for PushFrames {
    async fn next_text(&mut self) -> Result<Option<String>, TransportError> {
        match self.0.recv().await {
            Some(frame) => frame,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Transport for PushTransport {
    async fn open(&self, _job_id: &str) -> Result<Box<dyn FrameStream>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.sessions.lock().unwrap().pop_front() {
            Some(rx) => Ok(Box::new(PushFrames(rx))),
            None => Err(TransportError::ConnectFailed("no session queued".to_string())),
        }
    }
}

pub fn connection_manager(transport: Arc<PushTransport>) -> ConnectionManager {
    ConnectionManager::new(
        transport,
        ReconnectPolicy::new(Duration::from_millis(100), Duration::from_secs(1), Some(5)),
        Duration::from_secs(600),
    )
}

pub struct RunningJob {
    pub commands: mpsc::UnboundedSender<JobCommand>,
    pub views: watch::Receiver<JobView>,
    pub task: JoinHandle<(JobView, WorkflowRegistry)>,
}

impl RunningJob {
    pub fn send(&self, command: JobCommand) {
        self.commands.send(command).expect("driver stopped");
    }

    /// Waits (in virtual time) until the view satisfies `predicate`
    pub async fn wait_for(&mut self, predicate: impl FnMut(&JobView) -> bool) -> JobView {
        let view = tokio::time::timeout(Duration::from_secs(300), self.views.wait_for(predicate))
            .await
            .expect("timed out waiting for job view")
            .expect("driver stopped");
        view.clone()
    }

    pub async fn finish(self) -> (JobView, WorkflowRegistry) {
        let _ = self.commands.send(JobCommand::Shutdown);
        self.task.await.expect("driver panicked")
    }
}

pub fn spawn_driver(
    api: Arc<FakeStudio>,
    handle: ConnectionHandle,
    workflow: WorkflowRegistry,
    stop: StopCondition,
) -> RunningJob {
    spawn_driver_with(api, handle, workflow, stop, true)
}

pub fn spawn_driver_with(
    api: Arc<FakeStudio>,
    handle: ConnectionHandle,
    mut workflow: WorkflowRegistry,
    stop: StopCondition,
    auto_merge: bool,
) -> RunningJob {
    let driver = JobDriver::new(api, handle, POLL_INTERVAL, auto_merge);
    let views = driver.subscribe();
    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        let view = driver.run(rx, &mut workflow, stop).await;
        (view, workflow)
    });
    RunningJob {
        commands,
        views,
        task,
    }
}

pub fn chunk_completed(chunk_id: &str, duration: f64) -> String {
    serde_json::json!({
        "type": "chunk_completed",
        "chunk_id": chunk_id,
        "duration": duration,
    })
    .to_string()
}

pub fn chunk_failed(chunk_id: &str, current: u32, total: u32, error: &str) -> String {
    serde_json::json!({
        "type": "progress",
        "current": current,
        "total": total,
        "status": "processing",
        "chunk_id": chunk_id,
        "error": error,
    })
    .to_string()
}

pub fn generation_complete(total: u32, succeeded: u32, failed: u32) -> String {
    let rate = if total == 0 {
        0.0
    } else {
        succeeded as f64 / total as f64 * 100.0
    };
    serde_json::json!({
        "type": "generation_complete",
        "total_chunks": total,
        "succeeded": succeeded,
        "failed": failed,
        "success_rate": rate,
    })
    .to_string()
}
