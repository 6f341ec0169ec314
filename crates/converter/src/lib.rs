//! Media Converter
//!
//! Asynchronous media conversion service: classifies uploads, maps a single
//! quality level onto per-format encoder settings, runs the transcoding
//! engine on a bounded worker pool and tracks every conversion as a
//! pollable task.

pub mod classify;
pub mod concurrency;
pub mod encode;
pub mod job_executor;
pub mod quality;
pub mod registry;
pub mod server;
pub mod service;
pub mod staging;
pub mod startup;

pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use media_converter_config as config;
pub use media_converter_config::Config;

pub use classify::{classify, Classification, ClassifyError, MediaKind};
pub use encode::{build_ffmpeg_invocation, EncodeError, Invocation, PreprocessError};
pub use job_executor::{ConversionJob, ExecuteError, ExecutorSettings, JobExecutor};
pub use quality::{plan_encoding, EncodingPlan, Quality, QualityError};
pub use registry::{
    RegistryError, RegistryStats, TaskId, TaskOutcome, TaskRegistry, TaskSnapshot, TaskState,
};
pub use server::{create_router, run_server, ServerError};
pub use service::{
    BatchReceipt, CancelError, ConversionService, ServiceError, SubmitError, SubmittedTask,
    UploadedFile,
};
pub use startup::{run_startup_checks, StartupError};
