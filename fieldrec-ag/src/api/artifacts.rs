//! Artifact endpoints
//!
//! GET /api/spectrogram, /api/peaks and /api/stats, each taking
//! `?uri=/audio/<path>`. A cached artifact is returned with a strong ETag;
//! otherwise generation starts in the background and the response is
//! 202 `{"status":"building"}` until the artifact lands.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::models::{ArtifactKind, PeakStats};
use crate::services::{stats_computer::summarize, CachedArtifact, FetchOptions, Generation, LogicalAudioId, SpectrogramParams};
use crate::AppState;

/// Artifacts never change once written; regeneration changes the ETag
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Query string shared by the artifact endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactQuery {
    pub uri: Option<String>,
    /// Spectrogram horizontal resolution
    pub px_per_sec: Option<u32>,
    /// Spectrogram image height
    pub height: Option<u32>,
    /// `1` discards the cached artifact and rebuilds it
    pub regen: Option<String>,
}

impl ArtifactQuery {
    fn options(&self) -> FetchOptions {
        FetchOptions {
            force: matches!(self.regen.as_deref(), Some("1") | Some("true")),
            spectrogram: SpectrogramParams::clamped(self.px_per_sec, self.height),
        }
    }
}

/// GET /api/spectrogram?uri=
pub async fn get_spectrogram(
    State(state): State<AppState>,
    Query(query): Query<ArtifactQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(&state, ArtifactKind::Spectrogram, &query, &headers).await
}

/// GET /api/peaks?uri=
pub async fn get_peaks(
    State(state): State<AppState>,
    Query(query): Query<ArtifactQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(&state, ArtifactKind::Peaks, &query, &headers).await
}

/// GET /api/stats?uri=
///
/// Body is the stats record plus `activityPct` and `likelySound`.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<ArtifactQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(&state, ArtifactKind::Stats, &query, &headers).await
}

async fn serve_artifact(
    state: &AppState,
    kind: ArtifactKind,
    query: &ArtifactQuery,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let raw = query
        .uri
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing uri parameter".to_string()))?;
    let id = LogicalAudioId::from_uri(raw)?;

    match state.on_demand.get_id(&id, kind, query.options()).await? {
        Generation::Ready(artifact) => artifact_response(artifact, headers),
        Generation::Building => {
            tracing::debug!(uri = %id, kind = %kind, "Artifact building");
            Ok((StatusCode::ACCEPTED, Json(json!({ "status": "building" }))).into_response())
        }
        Generation::NotFound => Err(ApiError::NotFound(format!("recording {}", id))),
    }
}

fn artifact_response(artifact: CachedArtifact, headers: &HeaderMap) -> ApiResult<Response> {
    let etag = HeaderValue::from_str(&artifact.etag).map_err(|e| ApiError::Internal(e.to_string()))?;
    let cache_control = HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL);

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| artifact.matches(v))
        .unwrap_or(false);
    if not_modified {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (header::CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    let body = match artifact.kind {
        ArtifactKind::Stats => {
            let stats: PeakStats = serde_json::from_slice(&artifact.bytes)
                .map_err(|e| ApiError::Internal(format!("stats unreadable: {}", e)))?;
            serde_json::to_vec(&summarize(stats)).map_err(|e| ApiError::Internal(e.to_string()))?
        }
        _ => artifact.bytes,
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.kind.content_type())),
            (header::ETAG, etag),
            (header::CACHE_CONTROL, cache_control),
        ],
        body,
    )
        .into_response())
}

pub fn artifact_routes() -> Router<AppState> {
    Router::new()
        .route("/api/spectrogram", get(get_spectrogram))
        .route("/api/peaks", get(get_peaks))
        .route("/api/stats", get(get_stats))
}
