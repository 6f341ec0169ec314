//! Filesystem layout and temporary artifact ownership.
//!
//! Whoever creates an intermediate file holds a [`TempArtifact`] for it; the
//! guard deletes the file when dropped unless it was explicitly kept, so every
//! exit path (success, error, cancellation, panic) cleans up.

use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

/// Suffix appended to the sanitized base name of every converted file.
pub const CONVERTED_SUFFIX: &str = "_converted";

/// Replaces every character outside alphanumerics, space, period and
/// underscore with an underscore.
pub fn sanitize_basename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.trim_matches(|c| c == '.' || c == ' ').is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}

/// Output filename for an upload: `<sanitized base>_converted.<format>`.
pub fn output_filename(original_filename: &str, target_format: &str) -> String {
    // Strip any client-supplied directory components first
    let file_name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    let base = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!(
        "{}{}.{}",
        sanitize_basename(base),
        CONVERTED_SUFFIX,
        target_format.to_ascii_lowercase()
    )
}

/// Staging name for an upload: `<token>_<sanitized filename>`.
pub fn staged_upload_name(token: &str, original_filename: &str) -> String {
    let file_name = original_filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_filename);
    format!("{}_{}", token, sanitize_basename(file_name))
}

/// Removes a file, treating "already gone" as success.
///
/// Returns `Ok(true)` when a file was deleted and `Ok(false)` when nothing
/// was there.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort removal that logs instead of failing.
pub fn remove_quietly(path: &Path, what: &str) {
    match remove_if_exists(path) {
        Ok(true) => debug!(path = %path.display(), "removed {}", what),
        Ok(false) => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove {}", what),
    }
}

/// Streams `data` into a new upload file at `path`, returning the byte count.
///
/// A write that fails partway removes whatever reached the disk.
pub async fn write_upload<R>(path: &Path, mut data: R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let written: io::Result<u64> = async {
        let mut file = tokio::fs::File::create(path).await?;
        let n = tokio::io::copy(&mut data, &mut file).await?;
        file.flush().await?;
        Ok(n)
    }
    .await;

    if written.is_err() {
        remove_quietly(path, "partial upload");
    }
    written
}

/// Replaces every occurrence of the given paths in `text` with their basename.
pub fn redact_paths(text: &str, paths: &[&Path]) -> String {
    let mut redacted = text.to_string();
    for path in paths {
        let full = path.to_string_lossy();
        if full.is_empty() {
            continue;
        }
        if let Some(name) = path.file_name() {
            redacted = redacted.replace(full.as_ref(), &name.to_string_lossy());
        }
    }
    redacted
}

/// An intermediate file owned by the component that created it.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    label: &'static str,
    keep: bool,
}

impl TempArtifact {
    /// Takes ownership of `path`. The file need not exist yet.
    pub fn new(path: PathBuf, label: &'static str) -> Self {
        Self {
            path,
            label,
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Moves the artifact to `dest` and releases ownership.
    pub fn persist(mut self, dest: &Path) -> io::Result<PathBuf> {
        std::fs::rename(&self.path, dest)?;
        self.keep = true;
        Ok(dest.to_path_buf())
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.keep {
            remove_quietly(&self.path, self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, ReadBuf};

    /// Reader that fails on every poll, standing in for a full disk.
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "no space left")))
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_sanitized_names_use_safe_alphabet(name in ".{0,40}") {
            let sanitized = sanitize_basename(&name);
            prop_assert!(!sanitized.is_empty());
            prop_assert!(
                sanitized.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '.' || c == '_'),
                "unsafe char in {:?}", sanitized
            );
            prop_assert!(!sanitized.contains('/'));
        }

        #[test]
        fn prop_output_filename_shape(stem in "[a-zA-Z0-9_]{1,20}", ext in "[a-z0-9]{1,4}") {
            let out = output_filename(&format!("{}.{}", stem, ext), "MP4");
            prop_assert_eq!(out, format!("{}_converted.mp4", stem));
        }
    }

    #[test]
    fn test_sanitize_replaces_specials() {
        assert_eq!(sanitize_basename("my clip (final)!"), "my clip _final__");
        assert_eq!(sanitize_basename("a-b+c"), "a_b_c");
        assert_eq!(sanitize_basename("..."), "file");
    }

    #[test]
    fn test_output_filename_strips_directories() {
        assert_eq!(output_filename("../../etc/passwd.png", "jpg"), "passwd_converted.jpg");
        assert_eq!(output_filename("C:\\Users\\me\\cat.heic", "png"), "cat_converted.png");
        assert_eq!(output_filename("holiday video.mov", "mp4"), "holiday video_converted.mp4");
    }

    #[test]
    fn test_staged_upload_name() {
        assert_eq!(staged_upload_name("abc123", "my/clip?.mp4"), "abc123_clip_.mp4");
    }

    #[test]
    fn test_redact_paths() {
        let path = Path::new("/srv/uploads/abc_clip.mp4");
        let text = "/srv/uploads/abc_clip.mp4: Invalid data found when processing input";
        assert_eq!(
            redact_paths(text, &[path]),
            "abc_clip.mp4: Invalid data found when processing input"
        );
    }

    #[test]
    fn test_remove_if_exists_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(!remove_if_exists(&dir.path().join("missing")).unwrap());
    }

    #[test]
    fn test_temp_artifact_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.png");
        std::fs::write(&path, b"png").unwrap();
        {
            let _artifact = TempArtifact::new(path.clone(), "bridge output");
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_artifact_drop_without_file_is_silent() {
        let dir = TempDir::new().unwrap();
        let artifact = TempArtifact::new(dir.path().join("never-created"), "partial output");
        drop(artifact);
    }

    #[test]
    fn test_temp_artifact_persist_keeps_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("work.part");
        let dest = dir.path().join("final.mp4");
        std::fs::write(&src, b"data").unwrap();

        let artifact = TempArtifact::new(src.clone(), "partial output");
        let kept = artifact.persist(&dest).unwrap();

        assert_eq!(kept, dest);
        assert!(dest.exists());
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn test_write_upload_stores_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token_clip.mp4");

        let n = write_upload(&path, &b"frames"[..]).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(std::fs::read(&path).unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_write_upload_failure_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token_clip.mp4");

        // Some bytes land before the source fails
        let source = (&b"partial"[..]).chain(FailingReader);
        let err = write_upload(&path, source).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
