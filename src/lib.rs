pub mod api;
pub mod channel;
pub mod config;
pub mod job;
pub mod ledger;
pub mod merge;
pub mod playback;
pub mod progress;
pub mod workflow;

use api::{ApiError, ExportFormat, ExportOptions, HttpStudioApi, StudioApi};
use channel::{ConnectionManager, ReconnectPolicy, WebSocketTransport};
use config::{AppConfig, ConfigError};
use job::{JobCommand, JobDriver, JobView, StopCondition};
use playback::TimeIndex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use workflow::{WorkflowError, WorkflowRegistry};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// What one invocation should do with a job
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub project_id: String,
    pub generate: bool,
    pub retry_failed: bool,
    pub merge: bool,
    pub export: Option<ExportFormat>,
    /// Keep following the job until interrupted instead of exiting when idle
    pub watch: bool,
}

/// `RUST_LOG` style filtering, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub async fn run(config: AppConfig, options: RunOptions) -> Result<JobView, AppError> {
    let api: Arc<dyn StudioApi> = Arc::new(HttpStudioApi::new(
        &config.api_base_url,
        config.api_token.clone(),
        config.request_timeout_secs,
    )?);
    let transport = Arc::new(WebSocketTransport::new(&config.ws_base_url));
    let mut connections = ConnectionManager::new(
        transport,
        ReconnectPolicy::from_config(&config.reconnect),
        Duration::from_secs(config.heartbeat_timeout_secs),
    );
    let mut workflow = WorkflowRegistry::load(&config.workflow_store_path())?;

    let handle = connections.connect(&options.project_id);
    let driver = JobDriver::new(
        api,
        handle,
        Duration::from_millis(config.poll_interval_ms),
        config.auto_merge,
    );
    let reporter = tokio::spawn(report_progress(driver.subscribe(), config.reading_rate_wpm));

    let (commands, command_rx) = mpsc::unbounded_channel();
    if options.generate {
        let _ = commands.send(JobCommand::StartGeneration);
    }
    if options.retry_failed {
        let _ = commands.send(JobCommand::RetryFailed);
    }
    if options.merge {
        let _ = commands.send(JobCommand::Merge);
    }
    if let Some(format) = options.export.or_else(|| options.merge.then_some(config.export_format)) {
        let _ = commands.send(JobCommand::Export {
            format,
            options: ExportOptions::default(),
        });
    }

    let interrupt = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            let _ = interrupt.send(JobCommand::Shutdown);
        }
    });
    drop(commands);

    let stop = if options.watch {
        StopCondition::OnCommand
    } else {
        StopCondition::WhenSettled
    };
    let view = driver.run(command_rx, &mut workflow, stop).await;

    connections.disconnect(&options.project_id);
    reporter.abort();
    Ok(view)
}

async fn report_progress(mut views: watch::Receiver<JobView>, reading_rate_wpm: u32) {
    let mut last_line = String::new();
    let mut last_revision = None;

    while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();

        let line = format!(
            "{:?} {:.0}% | chunks {}/{} done, {} failed | channel {:?}",
            view.progress.status,
            view.progress.percentage,
            view.stats.completed,
            view.stats.total,
            view.stats.failed,
            view.progress.channel
        );
        if line != last_line {
            tracing::info!("{}", line);
            last_line = line;
        }

        if last_revision != Some(view.duration_revision) && !view.chunks.is_empty() {
            last_revision = Some(view.duration_revision);
            let index = TimeIndex::from_chunks(&view.chunks, reading_rate_wpm);
            tracing::info!(
                "Narration length {:.1}s over {} blocks ({})",
                index.total_duration(),
                index.len(),
                if index.is_measured() { "measured" } else { "partly estimated" }
            );
        }
    }
}
