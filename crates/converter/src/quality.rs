//! Quality mapping from a 1..=100 level to concrete encoder parameters.
//!
//! Every scalar is a linear interpolation over a per-format range:
//! `value = start + (q - 1) * (end - start) / 99`, rounded to the nearest
//! integer. Ranges where a lower number means better quality (CRF, JPEG
//! qscale) are written with `start > end`, which reverses the direction.

use crate::classify::MediaKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

/// Errors produced while validating a quality level or resolving a plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QualityError {
    #[error("Quality level must be between 1 and 100, got {0}")]
    OutOfRange(i64),

    #[error("Unsupported target format '{format}' for {kind} input")]
    UnsupportedTargetFormat { format: String, kind: MediaKind },
}

/// A validated quality level in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub fn new(level: i64) -> Result<Self, QualityError> {
        if (MIN_QUALITY as i64..=MAX_QUALITY as i64).contains(&level) {
            Ok(Self(level as u8))
        } else {
            Err(QualityError::OutOfRange(level))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Quality {
    type Error = QualityError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Inclusive parameter range; `start` is the value at quality 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u32,
    pub end: u32,
}

impl Range {
    const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Interpolates the value for `quality` along this range.
    pub fn at(self, quality: Quality) -> u32 {
        let step = f64::from(quality.get() - MIN_QUALITY) / f64::from(MAX_QUALITY - MIN_QUALITY);
        let span = f64::from(self.end) - f64::from(self.start);
        (f64::from(self.start) + step * span).round() as u32
    }
}

// H.264 family
pub const H264_CRF: Range = Range::new(35, 18);
pub const VIDEO_AUDIO_KBPS: Range = Range::new(64, 192);
pub const H264_PRESET: &str = "fast";
pub const CHROMA_420: &str = "yuv420p";

pub const WMV_VIDEO_KBPS: Range = Range::new(500, 2500);
pub const WEBM_VIDEO_KBPS: Range = Range::new(500, 3500);

pub const JPEG_QSCALE: Range = Range::new(31, 2);
pub const WEBP_QUALITY: Range = Range::new(1, 100);
/// zlib deflate levels; higher spends more encode time for a smaller file.
pub const PNG_COMPRESSION: Range = Range::new(0, 9);
pub const BMP_PIXEL_FORMAT: &str = "bgr24";
pub const TIFF_COMPRESSION: &str = "lzw";

pub const LOSSY_AUDIO_KBPS: Range = Range::new(64, 320);
pub const OPUS_KBPS: Range = Range::new(48, 256);
pub const WMA_KBPS: Range = Range::new(64, 192);
pub const FLAC_COMPRESSION: Range = Range::new(0, 8);

/// Rate control for a single encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateControl {
    /// Constant rate factor (lower is better).
    Crf(u32),
    /// Target bitrate in kbit/s.
    BitrateKbps(u32),
    /// Quantizer scale (lower is better).
    QScale(u32),
    /// Encoder-native quality, higher is better.
    Quality(u32),
    /// Lossless compression effort.
    CompressionLevel(u32),
}

/// Codec and rate control for one stream of the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPlan {
    pub codec: &'static str,
    pub rate: Option<RateControl>,
}

impl StreamPlan {
    fn new(codec: &'static str, rate: Option<RateControl>) -> Self {
        Self { codec, rate }
    }
}

/// Resolved encoder options for one request. Built once, consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingPlan {
    /// Kind of the *input*; video inputs may target audio or image outputs.
    pub input_kind: MediaKind,
    /// Kind of the output stream layout.
    pub output_kind: MediaKind,
    /// Lower-cased target format as requested.
    pub format: String,
    pub video: Option<StreamPlan>,
    pub audio: Option<StreamPlan>,
    pub preset: Option<&'static str>,
    pub pixel_format: Option<&'static str>,
    /// Fixed lossless compression algorithm (TIFF).
    pub compression_algo: Option<&'static str>,
}

/// Resolves the encoding plan for a quality level, input kind and target format.
pub fn plan_encoding(
    quality: Quality,
    input_kind: MediaKind,
    target_format: &str,
) -> Result<EncodingPlan, QualityError> {
    let format = target_format.trim().to_ascii_lowercase();
    let unsupported = || QualityError::UnsupportedTargetFormat {
        format: format.clone(),
        kind: input_kind,
    };

    let output_kind = output_kind_of(&format).ok_or_else(unsupported)?;
    let allowed = match input_kind {
        MediaKind::Video => true,
        MediaKind::Audio => output_kind == MediaKind::Audio,
        MediaKind::Image => output_kind == MediaKind::Image,
    };
    if !allowed {
        return Err(unsupported());
    }

    let mut plan = EncodingPlan {
        input_kind,
        output_kind,
        format: format.clone(),
        video: None,
        audio: None,
        preset: None,
        pixel_format: None,
        compression_algo: None,
    };

    match output_kind {
        MediaKind::Video => apply_video(&mut plan, quality),
        MediaKind::Audio => apply_audio(&mut plan, quality),
        MediaKind::Image => apply_image(&mut plan, quality),
    }

    Ok(plan)
}

fn output_kind_of(format: &str) -> Option<MediaKind> {
    match format {
        "mp4" | "mkv" | "avi" | "mov" | "flv" | "m4v" | "wmv" | "webm" | "mpg" | "mpeg"
        | "3gp" | "ts" => Some(MediaKind::Video),
        "mp3" | "aac" | "m4a" | "ogg" | "wav" | "flac" | "wma" | "opus" => Some(MediaKind::Audio),
        "jpg" | "jpeg" | "webp" | "png" | "gif" | "bmp" | "tiff" | "tif" => Some(MediaKind::Image),
        _ => None,
    }
}

fn apply_video(plan: &mut EncodingPlan, q: Quality) {
    match plan.format.as_str() {
        "wmv" => {
            plan.video = Some(StreamPlan::new(
                "wmv2",
                Some(RateControl::BitrateKbps(WMV_VIDEO_KBPS.at(q))),
            ));
            plan.audio = Some(StreamPlan::new(
                "wmav2",
                Some(RateControl::BitrateKbps(VIDEO_AUDIO_KBPS.at(q))),
            ));
        }
        "webm" => {
            plan.video = Some(StreamPlan::new(
                "libvpx-vp9",
                Some(RateControl::BitrateKbps(WEBM_VIDEO_KBPS.at(q))),
            ));
            plan.audio = Some(StreamPlan::new(
                "libopus",
                Some(RateControl::BitrateKbps(VIDEO_AUDIO_KBPS.at(q))),
            ));
            plan.pixel_format = Some(CHROMA_420);
        }
        // H.264 family, the fallback for every other video container
        _ => {
            plan.video = Some(StreamPlan::new("libx264", Some(RateControl::Crf(H264_CRF.at(q)))));
            plan.audio = Some(StreamPlan::new(
                "aac",
                Some(RateControl::BitrateKbps(VIDEO_AUDIO_KBPS.at(q))),
            ));
            plan.preset = Some(H264_PRESET);
            plan.pixel_format = Some(CHROMA_420);
        }
    }
}

fn apply_audio(plan: &mut EncodingPlan, q: Quality) {
    let (codec, rate) = match plan.format.as_str() {
        "mp3" => ("libmp3lame", Some(RateControl::BitrateKbps(LOSSY_AUDIO_KBPS.at(q)))),
        "aac" | "m4a" => ("aac", Some(RateControl::BitrateKbps(LOSSY_AUDIO_KBPS.at(q)))),
        "ogg" => ("libvorbis", Some(RateControl::BitrateKbps(LOSSY_AUDIO_KBPS.at(q)))),
        "opus" => ("libopus", Some(RateControl::BitrateKbps(OPUS_KBPS.at(q)))),
        "wma" => ("wmav2", Some(RateControl::BitrateKbps(WMA_KBPS.at(q)))),
        "flac" => ("flac", Some(RateControl::CompressionLevel(FLAC_COMPRESSION.at(q)))),
        // wav
        _ => ("pcm_s16le", None),
    };
    plan.audio = Some(StreamPlan::new(codec, rate));
}

fn apply_image(plan: &mut EncodingPlan, q: Quality) {
    let (codec, rate) = match plan.format.as_str() {
        "jpg" | "jpeg" => ("mjpeg", Some(RateControl::QScale(JPEG_QSCALE.at(q)))),
        "webp" => ("libwebp", Some(RateControl::Quality(WEBP_QUALITY.at(q)))),
        "png" => ("png", Some(RateControl::CompressionLevel(PNG_COMPRESSION.at(q)))),
        "gif" => ("gif", None),
        "bmp" => {
            plan.pixel_format = Some(BMP_PIXEL_FORMAT);
            ("bmp", None)
        }
        // tiff / tif
        _ => {
            plan.compression_algo = Some(TIFF_COMPRESSION);
            ("tiff", None)
        }
    };
    plan.video = Some(StreamPlan::new(codec, rate));
}
