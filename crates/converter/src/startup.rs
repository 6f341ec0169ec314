//! Startup checks module for the conversion service
//!
//! Provides preflight checks run before the service accepts work:
//! - Transcoding engine availability (`<engine> -version`)
//! - Still-image decoder availability (on `PATH` or at an explicit path)
//! - Creation of the uploads and conversions directories

use crate::config::Config;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Transcoding engine not available: {0}")]
    EngineUnavailable(String),

    #[error("HEIC/HEIF decoder not available: {0}")]
    DecoderUnavailable(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Extract the version token from `<engine> -version` output
///
/// Handles "ffmpeg version 6.1.1 ..." as well as git builds such as
/// "ffmpeg version n8.0-12-gabc ...". Returns the token as printed.
pub fn parse_engine_version(version_output: &str) -> Option<String> {
    let line = version_output
        .lines()
        .find(|line| line.to_ascii_lowercase().contains(" version "))?;
    let lower = line.to_ascii_lowercase();
    let start = lower.find(" version ")? + " version ".len();
    line[start..].split_whitespace().next().map(str::to_string)
}

/// Check the transcoding engine runs, returning its reported version
pub fn check_engine_available(engine: &Path) -> Result<String, StartupError> {
    let output = Command::new(engine)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::EngineUnavailable(format!(
                "{} -version failed; is it installed and in PATH? Error: {}",
                engine.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::EngineUnavailable(format!(
            "{} -version exited with {}",
            engine.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_engine_version(&stdout).unwrap_or_else(|| "unknown".to_string()))
}

/// Resolve a tool given either as a bare program name or as a path
pub fn resolve_tool(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() > 1 || tool.is_absolute() {
        return tool.is_file().then(|| tool.to_path_buf());
    }
    which::which(tool).ok()
}

/// Check the HEIC/HEIF decoder can be found
pub fn check_decoder_available(decoder: &Path) -> Result<PathBuf, StartupError> {
    resolve_tool(decoder).ok_or_else(|| {
        StartupError::DecoderUnavailable(format!(
            "{} not found; install libheif tools or set engine.heif_decoder_path",
            decoder.display()
        ))
    })
}

/// Create the uploads and conversions directories if missing
pub fn ensure_dirs(cfg: &Config) -> Result<(), StartupError> {
    for dir in [&cfg.paths.uploads_dir, &cfg.paths.conversions_dir] {
        std::fs::create_dir_all(dir).map_err(|source| StartupError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Transcoding engine
/// 2. HEIC/HEIF decoder
/// 3. Working directories
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let version = check_engine_available(&cfg.engine.ffmpeg_path)?;
    info!(engine = %cfg.engine.ffmpeg_path.display(), %version, "transcoding engine found");

    let decoder = check_decoder_available(&cfg.engine.heif_decoder_path)?;
    info!(decoder = %decoder.display(), "HEIC/HEIF decoder found");

    ensure_dirs(cfg)
}
