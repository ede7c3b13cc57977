//! Source audio streaming: GET /audio/*path
//!
//! Uses the same id validation as the artifact endpoints. Range requests
//! are handled by `ServeFile`.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{ApiError, ApiResult};
use crate::services::LogicalAudioId;
use crate::AppState;

/// GET /audio/*path
pub async fn stream_audio(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    // The router has already percent-decoded the path
    let id = LogicalAudioId::from_decoded(&path)?;
    let disk_path = state.resolver.resolve(&id);

    let is_file = tokio::fs::metadata(&disk_path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::NotFound(format!("recording {}", id)));
    }

    let response = match ServeFile::new(&disk_path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    Ok(response.map(Body::new).into_response())
}

pub fn audio_routes() -> Router<AppState> {
    Router::new().route("/audio/*path", get(stream_audio))
}
