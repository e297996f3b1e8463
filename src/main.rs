use clap::Parser;
use narration_sync_lib::api::ExportFormat;
use narration_sync_lib::{config, RunOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "narration-sync", about = "Follow and drive narration generation for a project")]
struct Cli {
    /// Project (job) id
    project_id: String,

    /// Start generating audio for every chunk
    #[arg(long)]
    generate: bool,

    /// Regenerate only the chunks that failed
    #[arg(long)]
    retry_failed: bool,

    /// Request merged audio now, then export it
    #[arg(long)]
    merge: bool,

    /// Export merged audio (mp3, wav, m4a) once it exists
    #[arg(long, value_parser = parse_format)]
    export: Option<ExportFormat>,

    /// Do not request merged audio automatically
    #[arg(long)]
    no_auto_merge: bool,

    /// Keep following the job until Ctrl-C
    #[arg(long)]
    watch: bool,

    #[arg(long, env = "NARRATION_CONFIG")]
    config: Option<PathBuf>,
}

fn parse_format(input: &str) -> Result<ExportFormat, String> {
    ExportFormat::parse(input).ok_or_else(|| format!("unsupported export format: {}", input))
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    narration_sync_lib::init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let mut app_config = match config::load_or_create(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    config::apply_env_overrides(&mut app_config);
    if cli.no_auto_merge {
        app_config.auto_merge = false;
    }

    let options = RunOptions {
        project_id: cli.project_id,
        generate: cli.generate,
        retry_failed: cli.retry_failed,
        merge: cli.merge,
        export: cli.export,
        watch: cli.watch,
    };

    match narration_sync_lib::run(app_config, options).await {
        Ok(view) => {
            if let Some(error) = view.progress.last_error.as_deref() {
                tracing::warn!("Last error: {}", error);
            }
            match view.audio_ref.as_deref() {
                Some(audio) => tracing::info!("Merged audio: {}", audio),
                None => tracing::info!("No merged audio yet"),
            }
            if view.stats.failed > 0 {
                tracing::warn!("{} chunks failed; rerun with --retry-failed", view.stats.failed);
                return ExitCode::from(2);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
