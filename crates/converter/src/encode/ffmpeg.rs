//! Transcoding command builder.
//!
//! Turns an [`EncodingPlan`] into a complete engine command line:
//! `<engine> -hide_banner -loglevel error -i <input> <stream args> -f <container> -y <output>`.
//! Pure and deterministic; nothing here touches the filesystem.

use super::Invocation;
use crate::classify::MediaKind;
use crate::quality::{EncodingPlan, RateControl, StreamPlan};
use std::path::Path;

/// Image muxer used for single-file still outputs.
const IMAGE2: &str = "image2";

/// Maps a target format to the engine's container (muxer) name.
pub fn container_for(format: &str) -> &str {
    match format {
        "mkv" => "matroska",
        "wmv" | "wma" => "asf",
        "m4v" => "mp4",
        "mpg" | "mpeg" => "mpeg",
        "ts" => "mpegts",
        "m4a" => "ipod",
        "aac" => "adts",
        "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" => IMAGE2,
        other => other,
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Video,
    Audio,
}

fn push_stream(inv: &mut Invocation, stream: Stream, plan: &StreamPlan) {
    let (codec_flag, bitrate_flag) = match stream {
        Stream::Video => ("-c:v", "-b:v"),
        Stream::Audio => ("-c:a", "-b:a"),
    };
    inv.arg(codec_flag).arg(plan.codec);

    match plan.rate {
        Some(RateControl::Crf(crf)) => {
            inv.arg("-crf").arg(crf.to_string());
        }
        Some(RateControl::BitrateKbps(kbps)) => {
            inv.arg(bitrate_flag).arg(format!("{}k", kbps));
        }
        Some(RateControl::QScale(q)) => {
            inv.arg("-q:v").arg(q.to_string());
        }
        Some(RateControl::Quality(q)) => {
            inv.arg("-quality").arg(q.to_string());
        }
        Some(RateControl::CompressionLevel(level)) => {
            inv.arg("-compression_level").arg(level.to_string());
        }
        None => {}
    }
}

/// Builds the engine invocation converting `input` into `output` per `plan`.
pub fn build_ffmpeg_invocation(
    engine: &Path,
    input: &Path,
    output: &Path,
    plan: &EncodingPlan,
) -> Invocation {
    let mut inv = Invocation::new(engine);

    // Only error-level diagnostics reach stderr
    inv.arg("-hide_banner").arg("-loglevel").arg("error");
    inv.arg("-i").arg(input);

    match plan.output_kind {
        MediaKind::Audio => {
            inv.arg("-vn");
            if let Some(audio) = &plan.audio {
                push_stream(&mut inv, Stream::Audio, audio);
            }
        }
        MediaKind::Video => {
            if let Some(video) = &plan.video {
                push_stream(&mut inv, Stream::Video, video);
            }
            if let Some(preset) = plan.preset {
                inv.arg("-preset").arg(preset);
            }
            if let Some(pix_fmt) = plan.pixel_format {
                inv.arg("-pix_fmt").arg(pix_fmt);
            }
            if let Some(audio) = &plan.audio {
                push_stream(&mut inv, Stream::Audio, audio);
            }
        }
        MediaKind::Image => {
            inv.arg("-an").arg("-frames:v").arg("1");
            if let Some(video) = &plan.video {
                push_stream(&mut inv, Stream::Video, video);
            }
            if let Some(pix_fmt) = plan.pixel_format {
                inv.arg("-pix_fmt").arg(pix_fmt);
            }
            if let Some(algo) = plan.compression_algo {
                inv.arg("-compression_algo").arg(algo);
            }
        }
    }

    let container = container_for(&plan.format);
    if container == IMAGE2 {
        inv.arg("-update").arg("1");
    }
    inv.arg("-f").arg(container);

    inv.arg("-y").arg(output);
    inv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{plan_encoding, Quality};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn args_of(inv: &Invocation) -> Vec<String> {
        inv.args
            .iter()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn build(kind: MediaKind, format: &str, quality: i64) -> Vec<String> {
        let plan = plan_encoding(Quality::new(quality).unwrap(), kind, format).unwrap();
        let inv = build_ffmpeg_invocation(
            Path::new("ffmpeg"),
            Path::new("/in/source"),
            Path::new("/out/target"),
            &plan,
        );
        args_of(&inv)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_invocation_frame(
            quality in 1i64..=100,
            format in prop::sample::select(vec![
                "mp4", "mkv", "avi", "mov", "flv", "m4v", "wmv", "webm",
                "mp3", "aac", "m4a", "ogg", "wav", "flac", "wma", "opus",
                "jpg", "jpeg", "webp", "png", "gif", "bmp", "tiff",
            ]),
            input in "[a-zA-Z0-9_/.-]{1,40}",
        ) {
            let plan = plan_encoding(Quality::new(quality).unwrap(), MediaKind::Video, format).unwrap();
            let inv = build_ffmpeg_invocation(
                Path::new("ffmpeg"),
                &PathBuf::from(&input),
                Path::new("/out/target"),
                &plan,
            );
            let again = build_ffmpeg_invocation(
                Path::new("ffmpeg"),
                &PathBuf::from(&input),
                Path::new("/out/target"),
                &plan,
            );
            prop_assert_eq!(&inv, &again);

            let args = args_of(&inv);
            prop_assert_eq!(&args[..3], &["-hide_banner", "-loglevel", "error"]);
            prop_assert!(has_flag_with_value(&args, "-i", &input));
            prop_assert!(has_flag_with_value(&args, "-f", container_for(format)));
            let n = args.len();
            prop_assert_eq!(&args[n - 2..], &["-y", "/out/target"]);
        }
    }

    #[test]
    fn test_container_mapping() {
        assert_eq!(container_for("mkv"), "matroska");
        assert_eq!(container_for("wmv"), "asf");
        assert_eq!(container_for("mp4"), "mp4");
        assert_eq!(container_for("webm"), "webm");
        assert_eq!(container_for("jpg"), "image2");
        assert_eq!(container_for("gif"), "gif");
        assert_eq!(container_for("mpg"), "mpeg");
        assert_eq!(container_for("mpeg"), "mpeg");
        assert_eq!(container_for("3gp"), "3gp");
        assert_eq!(container_for("ts"), "mpegts");
    }

    #[test]
    fn test_h264_invocation() {
        let args = build(MediaKind::Video, "mkv", 100);
        assert!(has_flag_with_value(&args, "-c:v", "libx264"));
        assert!(has_flag_with_value(&args, "-crf", "18"));
        assert!(has_flag_with_value(&args, "-preset", "fast"));
        assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p"));
        assert!(has_flag_with_value(&args, "-c:a", "aac"));
        assert!(has_flag_with_value(&args, "-b:a", "192k"));
        assert!(has_flag_with_value(&args, "-f", "matroska"));
        assert!(!has_flag(&args, "-vn"));
    }

    #[test]
    fn test_wmv_invocation_uses_bitrates() {
        let args = build(MediaKind::Video, "wmv", 1);
        assert!(has_flag_with_value(&args, "-c:v", "wmv2"));
        assert!(has_flag_with_value(&args, "-b:v", "500k"));
        assert!(has_flag_with_value(&args, "-b:a", "64k"));
        assert!(has_flag_with_value(&args, "-f", "asf"));
        assert!(!has_flag(&args, "-crf"));
    }

    #[test]
    fn test_audio_target_strips_video() {
        let args = build(MediaKind::Video, "mp3", 100);
        assert!(has_flag(&args, "-vn"));
        assert!(!has_flag(&args, "-c:v"));
        assert!(has_flag_with_value(&args, "-c:a", "libmp3lame"));
        assert!(has_flag_with_value(&args, "-b:a", "320k"));
        assert!(has_flag_with_value(&args, "-f", "mp3"));
    }

    #[test]
    fn test_flac_uses_compression_level() {
        let args = build(MediaKind::Audio, "flac", 100);
        assert!(has_flag_with_value(&args, "-compression_level", "8"));
        assert!(!has_flag(&args, "-b:a"));
    }

    #[test]
    fn test_image_target_single_frame() {
        let args = build(MediaKind::Image, "jpg", 100);
        assert!(has_flag_with_value(&args, "-frames:v", "1"));
        assert!(has_flag(&args, "-an"));
        assert!(has_flag_with_value(&args, "-c:v", "mjpeg"));
        assert!(has_flag_with_value(&args, "-q:v", "2"));
        assert!(has_flag_with_value(&args, "-update", "1"));
        assert!(has_flag_with_value(&args, "-f", "image2"));
    }

    #[test]
    fn test_bmp_and_tiff_fixed_options() {
        let bmp = build(MediaKind::Image, "bmp", 50);
        assert!(has_flag_with_value(&bmp, "-pix_fmt", "bgr24"));

        let tiff = build(MediaKind::Image, "tiff", 50);
        assert!(has_flag_with_value(&tiff, "-compression_algo", "lzw"));
        assert!(!has_flag(&tiff, "-q:v"));
    }

    #[test]
    fn test_webp_quality_passthrough() {
        let args = build(MediaKind::Image, "webp", 37);
        assert!(has_flag_with_value(&args, "-quality", "37"));
        assert!(has_flag_with_value(&args, "-f", "webp"));
        assert!(!has_flag(&args, "-update"));
    }
}
