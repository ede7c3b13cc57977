//! On-demand artifact generation
//!
//! A request for an artifact either returns the cached bytes, or starts a
//! background build and reports "building" so the client can poll. At most
//! one build per (recording, kind) runs at a time; later requests see the
//! in-flight entry and poll instead of launching the tool again.

use crate::models::ArtifactKind;
use crate::services::artifact_builder::{ArtifactBuilder, BuildError, BuildPlan, SpectrogramParams, SpectrogramStyle};
use crate::services::artifact_cache::CacheError;
use crate::services::path_resolver::{LogicalAudioId, PathRejected};
use crate::services::tool_runner::RunControl;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Cached artifact bytes with their validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
    pub etag: String,
}

impl CachedArtifact {
    pub fn new(kind: ArtifactKind, bytes: Vec<u8>) -> Self {
        let etag = strong_etag(&bytes);
        Self { kind, bytes, etag }
    }

    /// Whether an `If-None-Match` header value matches this artifact
    pub fn matches(&self, if_none_match: &str) -> bool {
        if_none_match
            .split(',')
            .map(|tag| tag.trim().trim_start_matches("W/"))
            .any(|tag| tag == "*" || tag == self.etag)
    }
}

/// Quoted SHA-256 of the content
pub fn strong_etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", hex)
}

/// Result of an artifact request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Ready(CachedArtifact),
    /// A build is running; poll again later
    Building,
    /// The source recording does not exist
    NotFound,
}

/// Per-request options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Discard the cached artifact and rebuild
    pub force: bool,
    pub spectrogram: SpectrogramParams,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Rejected(#[from] PathRejected),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

type InFlightKey = (LogicalAudioId, ArtifactKind);

/// Front door for artifact requests
#[derive(Clone)]
pub struct OnDemandGenerator {
    builder: Arc<ArtifactBuilder>,
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl OnDemandGenerator {
    pub fn new(builder: Arc<ArtifactBuilder>, timeout: Option<Duration>) -> Self {
        Self {
            builder,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn builder(&self) -> &ArtifactBuilder {
        &self.builder
    }

    /// Cancels every running on-demand build
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Parse a raw identifier and serve it
    pub async fn get(&self, raw_id: &str, kind: ArtifactKind, options: FetchOptions) -> Result<Generation, GenerateError> {
        let id = LogicalAudioId::parse(raw_id)?;
        self.get_id(&id, kind, options).await
    }

    /// Serve from cache or start a background build
    pub async fn get_id(&self, id: &LogicalAudioId, kind: ArtifactKind, options: FetchOptions) -> Result<Generation, GenerateError> {
        if options.force {
            if self.is_building(id, build_kind(kind)).await {
                return Ok(Generation::Building);
            }
            // A missing source keeps its cached artifact
            if !self.builder.source_exists(id).await {
                return Ok(Generation::NotFound);
            }
            self.builder.cache().remove(id, kind).await?;
        } else if let Some(artifact) = self.read_cached(id, kind).await? {
            return Ok(Generation::Ready(artifact));
        }

        if kind == ArtifactKind::Stats {
            return self.serve_stats(id).await;
        }

        if !self.builder.source_exists(id).await {
            return Ok(Generation::NotFound);
        }
        self.launch(id.clone(), plan_for(kind, options)).await;
        Ok(Generation::Building)
    }

    async fn is_building(&self, id: &LogicalAudioId, kind: ArtifactKind) -> bool {
        self.in_flight.lock().await.contains(&(id.clone(), kind))
    }

    async fn read_cached(&self, id: &LogicalAudioId, kind: ArtifactKind) -> Result<Option<CachedArtifact>, GenerateError> {
        match self.builder.cache().read(id, kind).await {
            Ok(bytes) => Ok(Some(CachedArtifact::new(kind, bytes))),
            Err(e) if e.is_missing() => {
                if let CacheError::Corrupt { .. } = e {
                    tracing::warn!(uri = %id, kind = %kind, error = %e, "Discarding corrupt cache entry");
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stats are cheap: derive them inline when peaks exist, otherwise
    /// build peaks first.
    async fn serve_stats(&self, id: &LogicalAudioId) -> Result<Generation, GenerateError> {
        match self.builder.derive_stats(id).await {
            Ok((_, bytes)) => Ok(Generation::Ready(CachedArtifact::new(ArtifactKind::Stats, bytes))),
            Err(BuildError::PeaksUnavailable(_)) => {
                if !self.builder.source_exists(id).await {
                    return Ok(Generation::NotFound);
                }
                self.launch(id.clone(), BuildPlan::Peaks).await;
                Ok(Generation::Building)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn launch(&self, id: LogicalAudioId, plan: BuildPlan) {
        let key = (id.clone(), plan.kind());
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(&key) {
                tracing::debug!(uri = %id, kind = %plan.kind(), "Build already in flight");
                return;
            }
            // A build that finished since the caller's cache miss has
            // already unregistered; its output is on disk
            if self.builder.cache().read(&id, plan.kind()).await.is_ok() {
                tracing::debug!(uri = %id, kind = %plan.kind(), "Artifact cached meanwhile");
                return;
            }
            in_flight.insert(key.clone());
        }

        let this = self.clone();
        tokio::spawn(async move {
            let control = RunControl::new(this.shutdown.child_token(), this.timeout);
            let result = this.builder.build(&id, &plan, &control).await;

            if result.is_ok() && plan == BuildPlan::Peaks {
                if let Err(e) = this.builder.derive_stats(&id).await {
                    tracing::warn!(uri = %id, error = %e, "Stats derivation after peaks build failed");
                }
            }

            match result {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {
                    tracing::info!(uri = %id, kind = %plan.kind(), "Build cancelled");
                }
                Err(e) => {
                    tracing::error!(uri = %id, kind = %plan.kind(), error = %e, "Build failed");
                }
            }

            this.in_flight.lock().await.remove(&key);
        });
    }
}

fn plan_for(kind: ArtifactKind, options: FetchOptions) -> BuildPlan {
    match kind {
        ArtifactKind::Spectrogram => BuildPlan::Spectrogram(SpectrogramStyle::Picture(options.spectrogram)),
        ArtifactKind::Peaks => BuildPlan::Peaks,
        ArtifactKind::Stats => BuildPlan::Stats,
    }
}

/// Kind whose build produces `kind`
fn build_kind(kind: ArtifactKind) -> ArtifactKind {
    match kind {
        ArtifactKind::Stats => ArtifactKind::Peaks,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_quoted_sha256() {
        let etag = strong_etag(b"abc");
        assert_eq!(
            etag,
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );
    }

    #[test]
    fn if_none_match_variants() {
        let artifact = CachedArtifact::new(ArtifactKind::Peaks, b"{}".to_vec());
        assert!(artifact.matches(&artifact.etag));
        assert!(artifact.matches(&format!("W/{}", artifact.etag)));
        assert!(artifact.matches(&format!("\"other\", {}", artifact.etag)));
        assert!(artifact.matches("*"));
        assert!(!artifact.matches("\"other\""));
    }

    #[test]
    fn stats_wait_on_peaks_builds() {
        assert_eq!(build_kind(ArtifactKind::Stats), ArtifactKind::Peaks);
        assert_eq!(build_kind(ArtifactKind::Spectrogram), ArtifactKind::Spectrogram);
    }
}
