//! Batch administration endpoints
//!
//! POST /api/admin/spectrograms, GET /api/admin/spectrograms/status,
//! GET /api/admin/spectrograms/folders, POST /api/admin/spectrograms/clear,
//! POST /api/admin/spectrograms/cancel

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::models::FolderStatus;
use crate::services::{list_top_level_folders, BatchOptions, BatchStart, BatchTarget};
use crate::AppState;

/// POST /api/admin/spectrograms request
#[derive(Debug, Deserialize)]
pub struct StartBatchRequest {
    pub folder: String,
    /// Worker count; the configured default for the kind when absent
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub kind: BatchTarget,
}

/// POST /api/admin/spectrograms response
#[derive(Debug, Serialize)]
pub struct StartBatchResponse {
    pub message: String,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub name: String,
    pub full_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelBatchRequest {
    pub folder: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /api/admin/spectrograms
///
/// Walks the folder, launches the workers and returns. The batch itself
/// keeps running; poll the status endpoint for progress.
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<StartBatchRequest>,
) -> ApiResult<Json<StartBatchResponse>> {
    let concurrency = request.concurrency.unwrap_or(match request.kind {
        BatchTarget::Spectrogram => state.batch_concurrency,
        BatchTarget::Peaks => state.peaks_concurrency,
    });
    if concurrency == 0 {
        return Err(ApiError::BadRequest("concurrency must be at least 1".to_string()));
    }

    let options = BatchOptions {
        concurrency,
        target: request.kind,
    };
    let response = match state.batch.start(&request.folder, options).await? {
        BatchStart::Empty => StartBatchResponse {
            message: format!("No .wav files found in {}", request.folder),
            total: 0,
        },
        BatchStart::Started(handle) => {
            let message = format!(
                "Started {} generation for {} with {} workers",
                options.target.kind(),
                handle.folder,
                concurrency
            );
            let total = handle.total;
            let folder = handle.folder;
            let join = handle.join;
            // Detach; the runner persists progress and logs the outcome
            tokio::spawn(async move {
                if let Err(e) = join.await {
                    tracing::error!(folder = %folder, error = %e, "Batch task aborted");
                }
            });
            StartBatchResponse { message, total }
        }
    };

    Ok(Json(response))
}

/// GET /api/admin/spectrograms/status
pub async fn batch_status(State(state): State<AppState>) -> Json<BTreeMap<String, FolderStatus>> {
    let all = state.progress.all().await;
    Json(all.iter().map(|(folder, p)| (folder.clone(), p.status())).collect())
}

/// GET /api/admin/spectrograms/folders
pub async fn list_folders(State(state): State<AppState>) -> ApiResult<Json<Vec<FolderListing>>> {
    let folders = list_top_level_folders(state.resolver.root()).await?;

    Ok(Json(
        folders
            .into_iter()
            .map(|f| FolderListing {
                name: f.name,
                full_path: f.full_path.to_string_lossy().into_owned(),
            })
            .collect(),
    ))
}

/// POST /api/admin/spectrograms/clear
///
/// Drops the progress bookkeeping only; generated artifacts stay.
pub async fn clear_progress(State(state): State<AppState>) -> Json<MessageResponse> {
    state.progress.clear_all().await;
    tracing::info!("Batch progress cleared");
    Json(MessageResponse {
        message: "Progress cleared".to_string(),
    })
}

/// POST /api/admin/spectrograms/cancel
pub async fn cancel_batch(
    State(state): State<AppState>,
    Json(request): Json<CancelBatchRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if !state.batch.cancel(&request.folder).await {
        return Err(ApiError::NotFound(format!("no running batch for {}", request.folder)));
    }
    Ok(Json(MessageResponse {
        message: format!("Cancelling batch for {}", request.folder),
    }))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/spectrograms", post(start_batch))
        .route("/api/admin/spectrograms/status", get(batch_status))
        .route("/api/admin/spectrograms/folders", get(list_folders))
        .route("/api/admin/spectrograms/clear", post(clear_progress))
        .route("/api/admin/spectrograms/cancel", post(cancel_batch))
}
