//! Recording discovery under the audio root

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One top-level folder of the audio root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    pub full_path: PathBuf,
}

/// Finds `.wav` recordings recursively
pub struct FileScanner {
    ignore_patterns: Vec<String>,
    extensions: Vec<String>,
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FileScanner {
    /// Scanner for `.wav`, skipping hidden entries and OS litter
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "@eaDir".to_string(),
            ],
            extensions: vec!["wav".to_string()],
        }
    }

    /// All recordings under `root`, sorted by path
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let mut symlink_visited = HashSet::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.should_process_entry(e, &mut symlink_visited));

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.has_audio_extension(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => tracing::warn!("Error accessing entry: {}", e),
            }
        }

        tracing::debug!(root = %root.display(), files = files.len(), "Scan complete");
        Ok(files)
    }

    /// Async wrapper running the walk on the blocking pool
    pub async fn scan_async(self, root: PathBuf) -> Result<Vec<PathBuf>, ScanError> {
        tokio::task::spawn_blocking(move || self.scan(&root))
            .await
            .map_err(|e| ScanError::Io(std::io::Error::other(e)))?
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        if file_name.starts_with('.') {
            return false;
        }
        if self.ignore_patterns.iter().any(|p| file_name.contains(p.as_str())) {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!("Symlink loop detected: {}", entry.path().display());
                    return false;
                }
            }
        }
        true
    }

    fn has_audio_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
            })
            .unwrap_or(false)
    }
}

/// Immediate subdirectories of `root`, sorted by name. Hidden ones are left out.
pub async fn list_top_level_folders(root: &Path) -> Result<Vec<FolderEntry>, ScanError> {
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::PathNotFound(root.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut folders = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            folders.push(FolderEntry {
                name,
                full_path: entry.path(),
            });
        }
    }
    folders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_wav_recursively_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("site/2024")).unwrap();
        fs::write(root.join("site/a.wav"), b"x").unwrap();
        fs::write(root.join("site/2024/B.WAV"), b"x").unwrap();
        fs::write(root.join("site/notes.txt"), b"x").unwrap();
        fs::write(root.join("site/.hidden.wav"), b"x").unwrap();

        let files = FileScanner::new().scan(&root.join("site")).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["site/2024/B.WAV", "site/a.wav"]);
    }

    #[test]
    fn missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileScanner::new().scan(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ScanError::PathNotFound(_)));

        let file = dir.path().join("f.wav");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            FileScanner::new().scan(&file).unwrap_err(),
            ScanError::NotADirectory(_)
        ));
    }

    #[tokio::test]
    async fn lists_only_visible_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        fs::create_dir(dir.path().join(".trash")).unwrap();
        fs::write(dir.path().join("loose.wav"), b"x").unwrap();

        let folders = list_top_level_folders(dir.path()).await.unwrap();
        let names: Vec<_> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(folders[0].full_path, dir.path().join("alpha"));
    }
}
