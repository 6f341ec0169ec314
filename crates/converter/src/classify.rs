//! Classifier module for determining the media kind of an upload.
//!
//! The declared MIME type wins when its primary type is video, image or
//! audio. Otherwise the filename extension is checked against fixed
//! allow-lists. HEIC/HEIF stills are flagged for the format bridge because
//! the transcoding engine cannot decode them directly.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Kind of media carried by an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Image => write!(f, "image"),
        }
    }
}

/// Video file extensions accepted when no usable MIME type is declared.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "mpg", "mpeg", "3gp", "m4v",
];

/// Image file extensions accepted when no usable MIME type is declared.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif", "heic", "heif",
];

/// Audio file extensions accepted when no usable MIME type is declared.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "m4a", "wav", "flac", "ogg", "opus", "wma"];

/// Still-image encodings that must go through the format bridge.
const BRIDGE_EXTENSIONS: &[&str] = &["heic", "heif"];

/// Error returned when an upload cannot be classified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("Unsupported input type for '{filename}' (mime: {mime})")]
    UnsupportedInputType { filename: String, mime: String },
}

/// Result of classifying one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: MediaKind,
    /// Lower-cased filename extension, if any.
    pub extension: Option<String>,
    /// Whether the format bridge must run before the engine.
    pub needs_bridge: bool,
}

/// Lower-cased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Classifies an upload from its declared MIME type and original filename.
///
/// Does not touch the filesystem; the caller owns cleanup of the stored
/// upload when this fails.
pub fn classify(mime: Option<&str>, filename: &str) -> Result<Classification, ClassifyError> {
    let extension = extension_of(filename);
    let mime = mime.map(str::trim).filter(|m| !m.is_empty());

    let kind = mime
        .and_then(kind_from_mime)
        .or_else(|| extension.as_deref().and_then(kind_from_extension))
        .ok_or_else(|| ClassifyError::UnsupportedInputType {
            filename: filename.to_string(),
            mime: mime.unwrap_or("none").to_string(),
        })?;

    let needs_bridge = kind == MediaKind::Image
        && (extension
            .as_deref()
            .map(|ext| BRIDGE_EXTENSIONS.contains(&ext))
            .unwrap_or(false)
            || mime.map(is_bridge_mime).unwrap_or(false));

    Ok(Classification {
        kind,
        extension,
        needs_bridge,
    })
}

fn kind_from_mime(mime: &str) -> Option<MediaKind> {
    let primary = mime.split('/').next()?.trim().to_ascii_lowercase();
    match primary.as_str() {
        "video" => Some(MediaKind::Video),
        "image" => Some(MediaKind::Image),
        "audio" => Some(MediaKind::Audio),
        _ => None,
    }
}

fn kind_from_extension(ext: &str) -> Option<MediaKind> {
    if VIDEO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Image)
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

// image/heic, image/heif and their -sequence variants
fn is_bridge_mime(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    lower
        .strip_prefix("image/")
        .map(|sub| sub.starts_with("heic") || sub.starts_with("heif"))
        .unwrap_or(false)
}
