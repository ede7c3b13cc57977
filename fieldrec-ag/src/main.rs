//! fieldrec-ag - artifact generation service
//!
//! `serve` (default) runs the HTTP API. `precompute-peaks` and
//! `backfill-stats` are offline maintenance passes over the same caches.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldrec_ag::config::{AgConfig, ConfigArgs};
use fieldrec_ag::services::{BatchOptions, BatchTarget, ProcessRunner, ProgressStore};
use fieldrec_ag::{build_router, AppState};

/// Command-line arguments for fieldrec-ag
#[derive(Parser, Debug)]
#[command(name = "fieldrec-ag")]
#[command(about = "Spectrogram, peaks and activity stats for field recordings")]
#[command(version)]
struct Cli {
    /// TOML config file (default: ~/.config/fieldrec/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: ConfigArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Generate peaks (and stats) for every recording missing them
    PrecomputePeaks {
        /// Folder relative to the audio root; the whole root when omitted
        folder: Option<String>,
        /// Worker count (default: configured peaks concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Compute stats for cached peaks lacking valid stats
    BackfillStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldrec_ag=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "fieldrec-ag starting"
    );

    let cli = Cli::parse();
    let toml = fieldrec_common::config::load_toml_config(cli.config.as_deref())
        .context("Failed to load config file")?;
    let config = AgConfig::resolve(&cli.settings, &toml).context("Invalid configuration")?;
    config.log_summary();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::PrecomputePeaks { folder, concurrency } => {
            precompute_peaks(config, folder, concurrency).await
        }
        Command::BackfillStats => backfill_stats(config).await,
    }
}

async fn serve(config: AgConfig) -> Result<()> {
    let progress = Arc::new(ProgressStore::load(&config.progress_file).await);
    let interrupted = progress.close_stale().await;
    if interrupted > 0 {
        warn!(count = interrupted, "Batches interrupted by the previous shutdown were closed");
    }

    let state = AppState::new(&config, Arc::new(ProcessRunner), progress);
    let builds = state.on_demand.shutdown_token();
    let batch = state.batch.clone();
    let app = build_router(state);

    info!("Starting HTTP server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Kill running tools; progress is already on disk
    builds.cancel();
    batch.cancel_all().await;
    info!("Server shutdown complete");
    Ok(())
}

async fn precompute_peaks(config: AgConfig, folder: Option<String>, concurrency: Option<usize>) -> Result<()> {
    let concurrency = concurrency.unwrap_or(config.peaks_concurrency).max(1);
    let progress = Arc::new(ProgressStore::load(&config.progress_file).await);
    let state = AppState::new(&config, Arc::new(ProcessRunner), progress);
    let options = BatchOptions {
        concurrency,
        target: BatchTarget::Peaks,
    };

    let run = async {
        match folder.as_deref() {
            Some(folder) => state.batch.run(folder, options).await,
            None => state.batch.run_all(options).await,
        }
    };
    let report = tokio::select! {
        report = run => report.context("Peaks batch failed")?,
        _ = shutdown_signal() => {
            state.batch.cancel_all().await;
            anyhow::bail!("Interrupted");
        }
    };

    info!(
        total = report.total,
        generated = report.generated,
        skipped = report.skipped,
        errors = report.errors,
        "Peaks precompute finished"
    );
    if report.errors > 0 {
        anyhow::bail!("{} of {} recordings failed", report.errors, report.total);
    }
    Ok(())
}

async fn backfill_stats(config: AgConfig) -> Result<()> {
    let cache = fieldrec_ag::services::ArtifactCache::new(&config.spectro_root, &config.cache_dir);
    let report = cache.backfill_stats().await;
    info!(
        peaks_files = report.peaks_files,
        written = report.written,
        already_valid = report.already_valid,
        failed = report.failed,
        "Stats backfill finished"
    );
    if report.failed > 0 {
        anyhow::bail!("{} stats files could not be written", report.failed);
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
