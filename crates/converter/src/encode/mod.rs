//! External process invocations: the transcoding engine and the HEIC/HEIF bridge.

pub mod ffmpeg;
pub mod heif;

pub use ffmpeg::{build_ffmpeg_invocation, container_for};
pub use heif::{build_heif_invocation, decode_to_png, PreprocessError};

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for running an external tool
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The process could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish before the deadline and was killed
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// A fully-specified external command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Program name used in logs and error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Builds the child process command. The child is killed if the handle is dropped.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Exit status and captured output of a finished process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// stderr followed by stdout, lossily decoded and trimmed.
    pub diagnostics: String,
}

/// Runs an invocation to completion, optionally bounded by `timeout`.
///
/// On timeout the child is killed before this returns.
pub async fn run_invocation(
    invocation: &Invocation,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, EncodeError> {
    let program = invocation.program_name();
    let child = invocation.command().spawn().map_err(|source| EncodeError::Spawn {
        program: program.clone(),
        source,
    })?;

    let wait = child.wait_with_output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            // Dropping the wait future drops the child, which kills it
            Err(_) => {
                return Err(EncodeError::Timeout {
                    program,
                    secs: limit.as_secs(),
                })
            }
        },
        None => wait.await,
    }
    .map_err(|source| EncodeError::Spawn {
        program: program.clone(),
        source,
    })?;

    let mut diagnostics = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if !stdout.is_empty() {
        if !diagnostics.is_empty() {
            diagnostics.push('\n');
        }
        diagnostics.push_str(stdout);
    }

    Ok(ProcessOutput {
        status: output.status,
        diagnostics,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_invocation_captures_output() {
        let mut inv = Invocation::new("sh");
        inv.arg("-c").arg("echo out; echo err >&2; exit 3");

        let output = run_invocation(&inv, None).await.unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.diagnostics, "err\nout");
    }

    #[tokio::test]
    async fn test_run_invocation_timeout() {
        let mut inv = Invocation::new("sh");
        inv.arg("-c").arg("sleep 5");

        let err = run_invocation(&inv, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, EncodeError::Timeout { ref program, .. } if program == "sh"));
    }

    #[tokio::test]
    async fn test_run_invocation_missing_program() {
        let inv = Invocation::new("/nonexistent/definitely-not-a-tool");
        let err = run_invocation(&inv, None).await.unwrap_err();
        assert!(matches!(err, EncodeError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-tool"));
    }

    #[test]
    fn test_program_name_uses_basename() {
        let inv = Invocation::new("/usr/local/bin/ffmpeg");
        assert_eq!(inv.program_name(), "ffmpeg");
    }
}
