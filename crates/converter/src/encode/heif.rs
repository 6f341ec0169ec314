//! HEIC/HEIF format bridge
//!
//! The transcoding engine cannot read HEIC/HEIF stills, so those uploads are
//! first decoded to a lossless PNG with an external decoder:
//! `<decoder> <input> <temp png>`. The caller owns the temporary PNG.

use super::{run_invocation, EncodeError, Invocation};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for the format bridge
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// The decoder ran but exited non-zero
    #[error("decoder exited with {}: {}", exit_code_label(.exit_code), .diagnostics)]
    DecoderFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    /// The decoder reported success but wrote nothing
    #[error("decoder produced no output")]
    NoOutput,

    /// The decoder could not be run
    #[error(transparent)]
    Process(#[from] EncodeError),
}

impl PreprocessError {
    /// Exit code of the decoder, when it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PreprocessError::DecoderFailed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Builds the decoder invocation.
pub fn build_heif_invocation(decoder: &Path, input: &Path, output_png: &Path) -> Invocation {
    let mut inv = Invocation::new(decoder);
    inv.arg(input).arg(output_png);
    inv
}

/// Decodes `input` into `output_png`.
///
/// # Returns
/// * `Ok(())` - the PNG exists and is non-empty
/// * `Err(PreprocessError)` - the decoder failed, timed out or wrote nothing
pub async fn decode_to_png(
    decoder: &Path,
    input: &Path,
    output_png: &Path,
    timeout: Option<Duration>,
) -> Result<(), PreprocessError> {
    let invocation = build_heif_invocation(decoder, input, output_png);
    debug!(program = %invocation.program_name(), "running format bridge");

    let output = run_invocation(&invocation, timeout).await?;
    if !output.status.success() {
        return Err(PreprocessError::DecoderFailed {
            exit_code: output.status.code(),
            diagnostics: output.diagnostics,
        });
    }

    match tokio::fs::metadata(output_png).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(PreprocessError::NoOutput),
    }
}
