use crate::api::{ApiError, Chunk, StudioApi};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Outcome of one scheduled pull, tagged with the poller generation that
/// produced it so results from a stopped poller can be told apart.
#[derive(Debug)]
pub struct PollResult {
    pub job_id: String,
    pub generation: u64,
    pub result: Result<Vec<Chunk>, ApiError>,
}

/// Fixed-interval `list_chunks` scheduler for one job.
///
/// Started when a generation batch starts and stopped when it completes or
/// the job is disconnected. Stopping aborts any request still in flight.
pub struct ChunkPoller {
    job_id: String,
    interval: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ChunkPoller {
    pub fn new(job_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            interval,
            generation: 0,
            task: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Starts (or restarts) polling; the first pull happens immediately.
    pub fn start<F>(&mut self, api: Arc<dyn StudioApi>, on_result: F)
    where
        F: Fn(PollResult) + Send + 'static,
    {
        self.stop();
        self.generation += 1;

        let job_id = self.job_id.clone();
        let generation = self.generation;
        let period = self.interval;

        tracing::info!(
            "Polling chunks for job {} every {}ms",
            job_id,
            period.as_millis()
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let result = api.list_chunks(&job_id).await;
                if let Err(e) = &result {
                    tracing::warn!("Chunk poll for job {} failed: {}", job_id, e);
                }
                on_result(PollResult {
                    job_id: job_id.clone(),
                    generation,
                    result,
                });
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.generation += 1;
            tracing::info!("Stopped chunk polling for job {}", self.job_id);
        }
    }
}

impl Drop for ChunkPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
