//! Job executor module for the conversion service
//!
//! Runs one conversion end to end with concurrency limiting via semaphore:
//! plan, optional format bridge, engine run, then finalization. Every
//! intermediate file is held in a [`TempArtifact`], so it is removed on any
//! exit path.

use crate::classify::MediaKind;
use crate::config::Config;
use crate::encode::{
    build_ffmpeg_invocation, decode_to_png, run_invocation, EncodeError, PreprocessError,
};
use crate::quality::{plan_encoding, Quality, QualityError};
use crate::registry::TaskId;
use crate::staging::{redact_paths, remove_quietly, TempArtifact};
use crate::ConcurrencyPlan;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The target format cannot be produced from this input kind
    #[error(transparent)]
    UnsupportedTargetFormat(#[from] QualityError),

    /// The HEIC/HEIF bridge failed
    #[error("HEIC/HEIF preprocessing failed: {message}")]
    PreprocessFailed {
        exit_code: Option<i32>,
        message: String,
    },

    /// The engine failed or produced nothing
    #[error("{}", engine_failure_message(.exit_code, .diagnostics))]
    EngineFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// A process exceeded the configured deadline
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The task was cancelled before it finished
    #[error("conversion cancelled")]
    Cancelled,

    /// The task panicked or the pool shut down
    #[error("internal error during conversion")]
    Internal,

    /// The converted file could not be moved into place
    #[error("failed to store converted file: {0}")]
    Store(std::io::Error),
}

fn engine_failure_message(exit_code: &Option<i32>, diagnostics: &str) -> String {
    if !diagnostics.is_empty() {
        return diagnostics.to_string();
    }
    match exit_code {
        Some(code) => format!("conversion engine exited with status {}", code),
        None => "conversion engine was terminated by a signal".to_string(),
    }
}

/// Executor settings resolved from configuration
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub ffmpeg_path: PathBuf,
    pub heif_decoder_path: PathBuf,
    /// Staged uploads and bridge intermediates
    pub uploads_dir: PathBuf,
    /// Finished outputs and partial engine output
    pub conversions_dir: PathBuf,
    /// Deadline per external process; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg_path: cfg.engine.ffmpeg_path.clone(),
            heif_decoder_path: cfg.engine.heif_decoder_path.clone(),
            uploads_dir: cfg.paths.uploads_dir.clone(),
            conversions_dir: cfg.paths.conversions_dir.clone(),
            timeout: match cfg.engine.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// One accepted upload waiting to be converted
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub task_id: TaskId,
    /// Staged upload; removed only after a successful conversion
    pub upload_path: PathBuf,
    pub input_kind: MediaKind,
    pub needs_bridge: bool,
    pub target_format: String,
    pub quality: Quality,
    /// Final file name inside the conversions directory
    pub output_filename: String,
}

/// Job executor that runs conversions with concurrency limiting
///
/// Uses a tokio Semaphore to limit the number of concurrent conversions
/// according to the concurrency plan. Jobs beyond the limit wait in FIFO
/// order for a permit.
pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
    settings: ExecutorSettings,
}

impl JobExecutor {
    pub fn new(plan: ConcurrencyPlan, settings: ExecutorSettings) -> Self {
        let permits = plan.max_concurrent_jobs.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            settings,
        }
    }

    /// Get the number of available permits (slots for concurrent jobs)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, ExecuteError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecuteError::Internal)
    }

    /// Execute a job through the conversion pipeline
    ///
    /// 1. Acquires a semaphore permit (respecting max_concurrent_jobs)
    /// 2. Resolves the encoding plan for the target format
    /// 3. Decodes HEIC/HEIF input to a temporary PNG when required
    /// 4. Runs the engine into a partial file in the conversions directory
    /// 5. Moves the partial file to its final name and deletes the upload
    ///
    /// # Returns
    /// * `Ok(PathBuf)` - path of the converted file
    /// * `Err(ExecuteError)` - the conversion failed; the upload is kept
    pub async fn execute(&self, job: &ConversionJob) -> Result<PathBuf, ExecuteError> {
        let _permit = self.acquire_permit().await?;
        let timeout = self.settings.timeout;

        let plan = plan_encoding(job.quality, job.input_kind, &job.target_format)?;
        info!(
            task_id = %job.task_id,
            kind = %job.input_kind,
            format = %plan.format,
            quality = job.quality.get(),
            "conversion started"
        );

        let bridge = if job.needs_bridge {
            Some(self.run_bridge(job, timeout).await?)
        } else {
            None
        };
        let input = bridge
            .as_ref()
            .map(|artifact| artifact.path())
            .unwrap_or(job.upload_path.as_path());

        let partial = TempArtifact::new(
            self.settings
                .conversions_dir
                .join(format!(".{}.{}.part", job.task_id, plan.format)),
            "partial output",
        );
        let final_path = self.settings.conversions_dir.join(&job.output_filename);

        let invocation =
            build_ffmpeg_invocation(&self.settings.ffmpeg_path, input, partial.path(), &plan);
        debug!(task_id = %job.task_id, args = ?invocation.args, "invoking engine");

        let output = run_invocation(&invocation, timeout)
            .await
            .map_err(|e| match e {
                EncodeError::Timeout { secs, .. } => ExecuteError::Timeout { secs },
                spawn @ EncodeError::Spawn { .. } => ExecuteError::EngineFailed {
                    exit_code: None,
                    diagnostics: spawn.to_string(),
                },
            })?;

        if !output.status.success() {
            let diagnostics = redact_paths(
                &output.diagnostics,
                &[
                    job.upload_path.as_path(),
                    input,
                    partial.path(),
                    final_path.as_path(),
                ],
            );
            warn!(
                task_id = %job.task_id,
                exit_code = ?output.status.code(),
                "engine failed"
            );
            return Err(ExecuteError::EngineFailed {
                exit_code: output.status.code(),
                diagnostics,
            });
        }

        let produced = tokio::fs::metadata(partial.path())
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(ExecuteError::EngineFailed {
                exit_code: output.status.code(),
                diagnostics: "no output produced".to_string(),
            });
        }

        let stored = partial.persist(&final_path).map_err(ExecuteError::Store)?;
        drop(bridge);
        remove_quietly(&job.upload_path, "upload");

        info!(
            task_id = %job.task_id,
            output = %job.output_filename,
            "conversion finished"
        );
        Ok(stored)
    }

    async fn run_bridge(
        &self,
        job: &ConversionJob,
        timeout: Option<Duration>,
    ) -> Result<TempArtifact, ExecuteError> {
        let artifact = TempArtifact::new(
            self.settings
                .uploads_dir
                .join(format!("{}_bridge.png", job.task_id)),
            "bridge output",
        );

        decode_to_png(
            &self.settings.heif_decoder_path,
            &job.upload_path,
            artifact.path(),
            timeout,
        )
        .await
        .map_err(|e| preprocess_error(e, &job.upload_path, artifact.path()))?;

        Ok(artifact)
    }
}

fn preprocess_error(err: PreprocessError, upload: &Path, bridge: &Path) -> ExecuteError {
    match err {
        PreprocessError::Process(EncodeError::Timeout { secs, .. }) => ExecuteError::Timeout { secs },
        other => ExecuteError::PreprocessFailed {
            exit_code: other.exit_code(),
            message: redact_paths(&other.to_string(), &[upload, bridge]),
        },
    }
}
