//! Conversion service
//!
//! Ties the pieces together: stages uploads, classifies them, registers a
//! task per accepted file and hands it to the executor on a background
//! task. Callers poll by task id; each task reaches exactly one terminal
//! state even when it is cancelled or panics.

use crate::classify::{classify, ClassifyError};
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::Config;
use crate::job_executor::{ConversionJob, ExecuteError, ExecutorSettings, JobExecutor};
use crate::quality::Quality;
use crate::registry::{
    NewTask, RegistryError, RegistryStats, TaskId, TaskOutcome, TaskRegistry, TaskSnapshot,
};
use crate::staging::{output_filename, remove_quietly, staged_upload_name, write_upload};
use crate::startup::{ensure_dirs, run_startup_checks, StartupError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Quality level used when a request does not specify one.
pub const DEFAULT_QUALITY: i64 = 75;

/// Error type for service initialisation
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),
}

/// Error type for submissions
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request as a whole is malformed
    #[error("{0}")]
    Validation(String),

    /// The file is neither video, audio nor image
    #[error(transparent)]
    UnsupportedInputType(#[from] ClassifyError),

    /// The upload could not be written to the uploads area
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for cancellation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error(transparent)]
    NotFound(#[from] RegistryError),

    #[error("task already finished")]
    AlreadyFinished,
}

/// One uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// A task accepted from a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedTask {
    pub task_id: TaskId,
    pub input_file: String,
    pub output_file: String,
}

/// A file left out of a batch, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub input_file: String,
    pub reason: String,
}

/// Outcome of a batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub tasks: Vec<SubmittedTask>,
    pub skipped: Vec<SkippedFile>,
}

/// Registry counts plus the pool size, as served on the metrics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub tasks: RegistryStats,
    pub max_concurrent_jobs: u32,
}

/// The conversion service and all its runtime components
pub struct ConversionService {
    pub config: Config,
    pub concurrency_plan: ConcurrencyPlan,
    registry: Arc<TaskRegistry>,
    executor: Arc<JobExecutor>,
    in_flight: Arc<Mutex<HashMap<TaskId, AbortHandle>>>,
}

impl ConversionService {
    /// Initialize the service with configuration, running startup checks
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        run_startup_checks(&config)?;
        Ok(Self::build(config))
    }

    /// Initialize the service without checking for external tools
    ///
    /// Useful for testing when the engine and decoder are not installed.
    /// The working directories are still created.
    pub fn new_without_checks(config: Config) -> Result<Self, ServiceError> {
        ensure_dirs(&config)?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let concurrency_plan = derive_plan(&config);
        let executor = Arc::new(JobExecutor::new(
            concurrency_plan.clone(),
            ExecutorSettings::from_config(&config),
        ));
        Self {
            config,
            concurrency_plan,
            registry: Arc::new(TaskRegistry::new()),
            executor,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// Validate a batch request and submit every file in it
    ///
    /// Request-level problems (no files, no target format, quality out of
    /// range) reject the whole batch. A file that cannot be classified or
    /// stored is skipped; the remaining files still run.
    pub async fn submit_batch(
        &self,
        files: Vec<UploadedFile>,
        target_format: Option<&str>,
        quality: Option<i64>,
    ) -> Result<BatchReceipt, SubmitError> {
        let target_format = target_format.map(str::trim).unwrap_or_default();
        if files.is_empty() || target_format.is_empty() {
            return Err(SubmitError::Validation(
                "Select at least one file and a target format.".to_string(),
            ));
        }
        let quality = Quality::new(quality.unwrap_or(DEFAULT_QUALITY))
            .map_err(|e| SubmitError::Validation(e.to_string()))?;

        let mut receipt = BatchReceipt::default();
        for file in files {
            let input_file = file.filename.clone();
            match self.submit(file, target_format, quality).await {
                Ok(task) => receipt.tasks.push(task),
                Err(e) => {
                    warn!(file = %input_file, error = %e, "skipping file");
                    receipt.skipped.push(SkippedFile {
                        input_file,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(receipt)
    }

    /// Stage and launch one uploaded file
    pub async fn submit(
        &self,
        file: UploadedFile,
        target_format: &str,
        quality: Quality,
    ) -> Result<SubmittedTask, SubmitError> {
        if file.filename.trim().is_empty() {
            return Err(SubmitError::Validation("missing filename".to_string()));
        }

        let token = Uuid::new_v4().simple().to_string();
        let upload_path = self
            .config
            .paths
            .uploads_dir
            .join(staged_upload_name(&token, &file.filename));
        write_upload(&upload_path, file.data.as_slice()).await?;

        self.submit_staged(
            upload_path,
            &file.filename,
            file.content_type.as_deref(),
            target_format,
            quality,
        )
    }

    /// Classify an already-stored upload and launch its conversion
    ///
    /// Returns as soon as the task is registered. An unclassifiable upload
    /// is deleted before the error is returned.
    pub fn submit_staged(
        &self,
        upload_path: PathBuf,
        original_filename: &str,
        mime: Option<&str>,
        target_format: &str,
        quality: Quality,
    ) -> Result<SubmittedTask, SubmitError> {
        let target_format = target_format.trim().to_ascii_lowercase();
        if target_format.is_empty() {
            return Err(SubmitError::Validation("missing target format".to_string()));
        }

        let classification = match classify(mime, original_filename) {
            Ok(classification) => classification,
            Err(e) => {
                remove_quietly(&upload_path, "unsupported upload");
                return Err(e.into());
            }
        };
        debug!(
            file = %original_filename,
            kind = %classification.kind,
            extension = classification.extension.as_deref().unwrap_or(""),
            bridge = classification.needs_bridge,
            "classified upload"
        );

        let output_file = output_filename(original_filename, &target_format);
        let task_id = self.registry.create(NewTask {
            original_filename: original_filename.to_string(),
            output_filename: output_file.clone(),
            upload_path: upload_path.clone(),
        });

        self.spawn_job(ConversionJob {
            task_id,
            upload_path,
            input_kind: classification.kind,
            needs_bridge: classification.needs_bridge,
            target_format,
            quality,
            output_filename: output_file.clone(),
        });

        Ok(SubmittedTask {
            task_id,
            input_file: original_filename.to_string(),
            output_file,
        })
    }

    fn spawn_job(&self, job: ConversionJob) {
        let task_id = job.task_id;
        let executor = self.executor.clone();
        self.supervise(task_id, async move { executor.execute(&job).await });
    }

    /// Run a task's pipeline and record its outcome once it ends
    fn supervise<F>(&self, task_id: TaskId, pipeline: F)
    where
        F: Future<Output = Result<PathBuf, ExecuteError>> + Send + 'static,
    {
        let inner = tokio::spawn(pipeline);

        // Registered before the supervisor exists, so its removal always comes after
        self.in_flight.lock().insert(task_id, inner.abort_handle());

        let registry = self.registry.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let outcome = match inner.await {
                Ok(Ok(output)) => TaskOutcome::Success { output },
                Ok(Err(e)) => {
                    warn!(%task_id, error = %e, "conversion failed");
                    TaskOutcome::Failure {
                        message: e.to_string(),
                    }
                }
                // Only `cancel` aborts, and it has already recorded the outcome
                Err(join) if join.is_cancelled() => {
                    in_flight.lock().remove(&task_id);
                    return;
                }
                Err(join) => {
                    error!(%task_id, error = %join, "conversion task panicked");
                    TaskOutcome::Failure {
                        message: ExecuteError::Internal.to_string(),
                    }
                }
            };
            in_flight.lock().remove(&task_id);

            let produced = match &outcome {
                TaskOutcome::Success { output } => Some(output.clone()),
                TaskOutcome::Failure { .. } => None,
            };
            match registry.complete(&task_id, outcome) {
                Ok(true) => {}
                // Cancelled after the output was stored; nobody will ask for it
                Ok(false) => {
                    if let Some(output) = produced {
                        remove_quietly(&output, "output of cancelled task");
                    }
                }
                Err(e) => warn!(%task_id, error = %e, "completed task missing from registry"),
            }
        });
    }

    /// Snapshot of a task
    pub fn status(&self, id: &TaskId) -> Result<TaskSnapshot, RegistryError> {
        self.registry.get(id)
    }

    /// Cancel an in-flight task
    ///
    /// The task is marked failed immediately; aborting it drops the
    /// running pipeline, which kills the child process and removes its
    /// temporary files.
    pub fn cancel(&self, id: &TaskId) -> Result<(), CancelError> {
        let applied = self.registry.complete(
            id,
            TaskOutcome::Failure {
                message: ExecuteError::Cancelled.to_string(),
            },
        )?;
        if !applied {
            return Err(CancelError::AlreadyFinished);
        }
        if let Some(handle) = self.in_flight.lock().remove(id) {
            handle.abort();
        }
        info!(task_id = %id, "conversion cancelled");
        Ok(())
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            tasks: self.registry.stats(),
            max_concurrent_jobs: self.concurrency_plan.max_concurrent_jobs,
        }
    }

    /// Evict expired terminal tasks and delete the uploads they retained
    pub fn sweep(&self, ttl: Duration) -> usize {
        sweep_registry(&self.registry, ttl)
    }

    /// Start the background sweeper
    ///
    /// Returns `None` when eviction is disabled (`task_ttl_secs = 0`).
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        let ttl_secs = self.config.registry.task_ttl_secs;
        if ttl_secs == 0 {
            return None;
        }
        let ttl = Duration::from_secs(ttl_secs);
        let period = Duration::from_secs(self.config.registry.sweep_interval_secs.max(1));
        let registry = self.registry.clone();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                sweep_registry(&registry, ttl);
            }
        }))
    }
}

fn sweep_registry(registry: &TaskRegistry, ttl: Duration) -> usize {
    let evicted = registry.evict_expired(ttl);
    for task in &evicted {
        debug!(task_id = %task.id, state = task.state.as_str(), "evicting task");
        remove_quietly(&task.upload_path, "retained upload");
    }
    if !evicted.is_empty() {
        debug!(count = evicted.len(), "evicted expired tasks");
    }
    evicted.len()
}
