//! Shared fixtures for fieldrec-ag integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use fieldrec_ag::config::{AgConfig, ConfigArgs};
use fieldrec_ag::services::{ProgressStore, RunControl, ToolError, ToolInvocation, ToolOutput, ToolRunner};
use fieldrec_ag::AppState;
use fieldrec_common::config::TomlConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

pub const PEAKS_JSON: &str =
    r#"{"version":2,"channels":1,"sample_rate":44100,"samples_per_pixel":882,"bits":8,"length":6,"data":[0,0,2,40,60,1]}"#;

/// Scripted stand-in for audiowaveform/ffmpeg/ffprobe.
///
/// Writes a fake artifact to the output argument, reports a 5 s duration
/// from the probe, fails on configured source names and tracks how many
/// invocations overlap. Honors the run's cancel token and timeout.
#[derive(Default)]
pub struct MockToolRunner {
    delay: Duration,
    slow: Vec<(String, Duration)>,
    failing: Vec<String>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl MockToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Take `delay` for every invocation whose input path ends with `name`
    pub fn slow_on(mut self, name: &str, delay: Duration) -> Self {
        self.slow.push((name.to_string(), delay));
        self
    }

    /// Fail every invocation whose input path ends with `name`
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c.program == program).count()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn run(&self, invocation: &ToolInvocation, control: &RunControl) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(invocation.clone());

        if invocation.program == "ffprobe" {
            return Ok(ToolOutput {
                exit_code: Some(0),
                stdout: b"5.000000\n".to_vec(),
                stderr: Vec::new(),
            });
        }

        let source = invocation
            .arg_after("-i")
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let delay = self
            .slow
            .iter()
            .find(|(name, _)| source.ends_with(name.as_str()))
            .map(|(_, delay)| *delay)
            .unwrap_or(self.delay);
        let limit = async {
            match control.timeout {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let interrupted = tokio::select! {
            _ = tokio::time::sleep(delay) => None,
            _ = control.cancel.cancelled() => Some(ToolError::Cancelled { program: invocation.program.clone() }),
            _ = limit => Some(ToolError::Timeout {
                program: invocation.program.clone(),
                after: control.timeout.unwrap_or_default(),
            }),
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(err) = interrupted {
            return Err(err);
        }

        if self.failing.iter().any(|name| source.ends_with(name.as_str())) {
            return Err(ToolError::ExitStatus {
                program: invocation.program.clone(),
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }

        let (output, payload): (PathBuf, &[u8]) = if invocation.program == "audiowaveform" {
            let out = invocation.arg_after("-o").cloned().unwrap_or_default();
            (PathBuf::from(out), PEAKS_JSON.as_bytes())
        } else {
            let out = invocation.args.last().cloned().unwrap_or_default();
            (PathBuf::from(out), PNG_BYTES)
        };
        std::fs::write(&output, payload).map_err(|source| ToolError::Io {
            program: invocation.program.clone(),
            source,
        })?;

        Ok(ToolOutput {
            exit_code: Some(0),
            ..ToolOutput::default()
        })
    }
}

/// Temp audio root + cache dirs wired into an [`AppState`]
pub struct TestEnv {
    pub dir: TempDir,
    pub config: AgConfig,
    pub runner: Arc<MockToolRunner>,
    pub state: AppState,
}

impl TestEnv {
    pub async fn new(runner: MockToolRunner) -> Self {
        Self::with_args(runner, ConfigArgs::default()).await
    }

    /// Like [`TestEnv::new`] with extra config flags; the roots are always
    /// placed in the temp dir
    pub async fn with_args(runner: MockToolRunner, extra: ConfigArgs) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            audio_root: Some(dir.path().join("audio")),
            cache_dir: Some(dir.path().join("cache")),
            spectro_root: Some(dir.path().join("spectro")),
            progress_file: Some(dir.path().join("progress.json")),
            ..extra
        };
        let config = AgConfig::resolve(&args, &TomlConfig::default()).unwrap();
        std::fs::create_dir_all(&config.audio_root).unwrap();

        let runner = Arc::new(runner);
        let progress = Arc::new(ProgressStore::load(&config.progress_file).await);
        let state = AppState::new(&config, runner.clone(), progress);
        Self { dir, config, runner, state }
    }

    /// Create a fake recording under the audio root
    pub fn add_recording(&self, relative: &str) -> PathBuf {
        let path = self.config.audio_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"RIFF\0\0\0\0WAVEfmt ").unwrap();
        path
    }
}

/// Poll until `path` exists or panic after a few seconds
pub async fn wait_for_file(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", path.display());
}
