//! fieldrec-ag library interface
//!
//! Derived-artifact generation for field recordings: spectrogram images,
//! waveform peaks and activity statistics, cached once per recording and
//! served over HTTP or produced in bulk by batch jobs.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use crate::config::AgConfig;
use crate::services::{
    ArtifactBuilder, ArtifactCache, BatchRunner, OnDemandGenerator, PathResolver, ProgressStore, ToolRunner,
};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: PathResolver,
    pub cache: ArtifactCache,
    pub on_demand: OnDemandGenerator,
    pub batch: BatchRunner,
    pub progress: Arc<ProgressStore>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    pub batch_concurrency: usize,
    pub peaks_concurrency: usize,
}

impl AppState {
    pub fn new(config: &AgConfig, runner: Arc<dyn ToolRunner>, progress: Arc<ProgressStore>) -> Self {
        let resolver = PathResolver::new(&config.audio_root);
        let cache = ArtifactCache::new(&config.spectro_root, &config.cache_dir);
        let builder = Arc::new(ArtifactBuilder::new(
            resolver.clone(),
            cache.clone(),
            config.tools.clone(),
            runner,
            config.peaks,
        ));
        let on_demand = OnDemandGenerator::new(builder.clone(), config.tool_timeout);
        let batch = BatchRunner::new(builder, progress.clone(), config.tool_timeout);

        Self {
            resolver,
            cache,
            on_demand,
            batch,
            progress,
            startup_time: Utc::now(),
            batch_concurrency: config.batch_concurrency,
            peaks_concurrency: config.peaks_concurrency,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::artifact_routes())
        .merge(api::admin_routes())
        .merge(api::audio_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
