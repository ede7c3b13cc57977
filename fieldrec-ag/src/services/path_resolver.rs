//! Logical audio id → on-disk path
//!
//! Every component that turns a client-supplied id into a filesystem path
//! goes through [`LogicalAudioId`] and [`PathResolver`]. Resolution is pure
//! string arithmetic: the filesystem is never consulted, so rejected inputs
//! leak nothing about what exists under the root.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// URI prefix of the virtual audio namespace
pub const AUDIO_URI_PREFIX: &str = "/audio/";

/// Why an id was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathRejected {
    #[error("audio id is empty")]
    Empty,

    #[error("audio uri must start with {AUDIO_URI_PREFIX}")]
    NotAudioUri,

    #[error("audio id is not valid percent-encoded UTF-8")]
    InvalidEncoding,

    #[error("audio id contains a parent-directory segment")]
    ParentTraversal,

    #[error("audio id is an absolute path")]
    Absolute,

    #[error("audio id contains a forbidden character")]
    ForbiddenCharacter,
}

/// Validated, normalized relative id such as `siteA/2024/a.wav`
///
/// Segments are joined with `/`; there are no empty, `.` or `..` segments
/// and no leading separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalAudioId(String);

impl LogicalAudioId {
    /// Parse a client-supplied id, percent-decoding it first.
    ///
    /// Accepts both the URI form (`/audio/siteA/a.wav`) and the bare
    /// relative form (`siteA/a.wav`).
    pub fn parse(raw: &str) -> Result<Self, PathRejected> {
        let body = raw.strip_prefix(AUDIO_URI_PREFIX).unwrap_or(raw);
        let decoded = urlencoding::decode(body).map_err(|_| PathRejected::InvalidEncoding)?;
        Self::from_decoded(&decoded)
    }

    /// Parse an id that must use the `/audio/` URI form
    pub fn from_uri(uri: &str) -> Result<Self, PathRejected> {
        if !uri.starts_with(AUDIO_URI_PREFIX) {
            return Err(PathRejected::NotAudioUri);
        }
        Self::parse(uri)
    }

    /// Validate an already-decoded relative id
    pub fn from_decoded(decoded: &str) -> Result<Self, PathRejected> {
        if decoded.trim().is_empty() {
            return Err(PathRejected::Empty);
        }
        if decoded.contains('\0') {
            return Err(PathRejected::ForbiddenCharacter);
        }
        if decoded.starts_with('/') || decoded.starts_with('\\') || has_drive_prefix(decoded) {
            return Err(PathRejected::Absolute);
        }

        let mut segments = Vec::new();
        for segment in decoded.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => return Err(PathRejected::ParentTraversal),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Err(PathRejected::Empty);
        }

        Ok(Self(segments.join("/")))
    }

    /// Normalized relative id
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `/audio/...` form
    pub fn to_uri(&self) -> String {
        format!("{}{}", AUDIO_URI_PREFIX, self.0)
    }

    /// Path segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Id as a relative path using the platform separator
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for LogicalAudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn has_drive_prefix(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Maps logical ids onto the configured audio root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Configured audio root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Disk path of a validated id, always lexically inside the root
    pub fn resolve(&self, id: &LogicalAudioId) -> PathBuf {
        self.root.join(id.relative_path())
    }

    /// Validate a raw id and resolve it in one step
    pub fn resolve_str(&self, raw: &str) -> Result<(LogicalAudioId, PathBuf), PathRejected> {
        let id = LogicalAudioId::parse(raw)?;
        let path = self.resolve(&id);
        Ok((id, path))
    }

    /// Resolve a batch folder name (relative to the root, same rules as ids).
    ///
    /// Returns the normalized folder key alongside the directory.
    pub fn resolve_folder(&self, folder: &str) -> Result<(String, PathBuf), PathRejected> {
        self.resolve_str(folder)
            .map(|(id, path)| (id.as_str().to_string(), path))
    }

    /// Logical id of a file discovered under the root, None if outside it
    pub fn logical_id_for(&self, disk_path: &Path) -> Option<LogicalAudioId> {
        let relative = disk_path.strip_prefix(&self.root).ok()?;
        let joined = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        LogicalAudioId::from_decoded(&joined).ok()
    }
}
