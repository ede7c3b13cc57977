//! External tool adapter
//!
//! Spectrogram rendering, peak extraction and duration probing all run as
//! child processes. Each call is described by a [`ToolInvocation`] (program,
//! arguments, accepted exit codes) and executed by a [`ToolRunner`], so tests
//! can substitute a scripted runner for the real binaries.

use async_trait::async_trait;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bytes of stderr kept in error messages
const STDERR_TAIL_BYTES: usize = 2048;

/// One external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<OsString>,
    /// Exit codes treated as success
    pub success_codes: Vec<i32>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            success_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn success_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.success_codes = codes.into();
        self
    }

    pub fn is_success(&self, code: Option<i32>) -> bool {
        code.map(|c| self.success_codes.contains(&c)).unwrap_or(false)
    }

    /// Value following `flag` in the argument list
    pub fn arg_after(&self, flag: &str) -> Option<&OsString> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// Captured output of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Cancellation and timeout for one invocation.
///
/// The default is "no timeout, never cancelled".
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self { cancel, timeout }
    }
}

/// Tool failures
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("{program} cancelled")]
    Cancelled { program: String },

    #[error("I/O error waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ToolError::Cancelled { .. })
    }
}

/// Executes external tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion, honouring `control`.
    ///
    /// Returns `Ok` only when the exit code is one of the invocation's
    /// success codes.
    async fn run(&self, invocation: &ToolInvocation, control: &RunControl) -> Result<ToolOutput, ToolError>;
}

/// [`ToolRunner`] backed by real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation, control: &RunControl) -> Result<ToolOutput, ToolError> {
        tracing::debug!(command = %invocation.display(), "Running external tool");

        // kill_on_drop: a timed-out or cancelled child is killed when the
        // wait future is dropped by select!
        let child = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(|source| ToolError::Io {
                program: invocation.program.clone(),
                source,
            })?,
            _ = control.cancel.cancelled() => {
                return Err(ToolError::Cancelled { program: invocation.program.clone() });
            }
            _ = deadline(control.timeout) => {
                return Err(ToolError::Timeout {
                    program: invocation.program.clone(),
                    after: control.timeout.unwrap_or_default(),
                });
            }
        };

        let exit_code = output.status.code();
        if !invocation.is_success(exit_code) {
            return Err(ToolError::ExitStatus {
                program: invocation.program.clone(),
                code: exit_code,
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(ToolOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending::<()>().await,
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_of_successful_run() {
        let invocation = ToolInvocation::new("sh").args(["-c", "printf 12.5"]);
        let output = ProcessRunner.run(&invocation, &RunControl::default()).await.unwrap();
        assert_eq!(output.stdout, b"12.5");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_unless_accepted() {
        let invocation = ToolInvocation::new("sh").args(["-c", "echo boom >&2; exit 3"]);
        let err = ProcessRunner.run(&invocation, &RunControl::default()).await.unwrap_err();
        match err {
            ToolError::ExitStatus { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let accepted = invocation.success_codes(vec![0, 3]);
        assert!(ProcessRunner.run(&accepted, &RunControl::default()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let invocation = ToolInvocation::new("/nonexistent/fieldrec-tool");
        let err = ProcessRunner.run(&invocation, &RunControl::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_hung_tool() {
        let invocation = ToolInvocation::new("sleep").arg("30");
        let control = RunControl::new(CancellationToken::new(), Some(Duration::from_millis(100)));
        let started = std::time::Instant::now();
        let err = ProcessRunner.run(&invocation, &control).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_stops_tool() {
        let invocation = ToolInvocation::new("sleep").arg("30");
        let control = RunControl::default();
        let token = control.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let err = ProcessRunner.run(&invocation, &control).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn arg_after_finds_flag_values() {
        let invocation = ToolInvocation::new("audiowaveform").args(["-i", "in.wav", "-o", "out.json"]);
        assert_eq!(invocation.arg_after("-o"), Some(&OsString::from("out.json")));
        assert_eq!(invocation.arg_after("--missing"), None);
        assert_eq!(invocation.display(), "audiowaveform -i in.wav -o out.json");
    }
}
