//! Delivery of a finished document.
//!
//! The pipeline writes its artifact to a path; a sink takes it from there.
//! Two sinks exist: a local directory (unique file names, optional
//! sub-folder) and an HTTP endpoint accepting a multipart upload.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Upload timeout of [`HttpUploadSink`].
pub const UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Error delivering an artifact.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload to {url} failed: {reason}")]
    Upload { url: String, reason: String },

    #[error("Upload to {url} rejected with HTTP {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
}

/// Destination for a finished document.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver `artifact`, naming it after `original_filename` where the
    /// sink stores names. Returns a description of where it went.
    async fn deliver(&self, artifact: &Path, original_filename: &str)
        -> Result<String, SinkError>;
}

/// Copies artifacts into `<base>[/<sub_folder>]/<stem>_<uuid><ext>`.
#[derive(Debug, Clone)]
pub struct LocalDirSink {
    base: PathBuf,
    sub_folder: Option<String>,
}

impl LocalDirSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            sub_folder: None,
        }
    }

    /// Store under a sub-folder. The name is sanitised; a name that is empty
    /// after sanitising is ignored.
    pub fn with_sub_folder(mut self, name: impl AsRef<str>) -> Self {
        let safe = secure_filename(name.as_ref());
        self.sub_folder = (!safe.is_empty()).then_some(safe);
        self
    }

    /// Directory files are written to.
    pub fn destination_dir(&self) -> PathBuf {
        match &self.sub_folder {
            Some(sub) => self.base.join(sub),
            None => self.base.clone(),
        }
    }
}

#[async_trait]
impl OutputSink for LocalDirSink {
    async fn deliver(
        &self,
        artifact: &Path,
        original_filename: &str,
    ) -> Result<String, SinkError> {
        let dir = self.destination_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SinkError::Io {
                path: dir.clone(),
                source: e,
            })?;

        let destination = dir.join(unique_name(original_filename));
        tokio::fs::copy(artifact, &destination)
            .await
            .map_err(|e| SinkError::Io {
                path: destination.clone(),
                source: e,
            })?;
        info!(destination = %destination.display(), "output saved locally");
        Ok(destination.display().to_string())
    }
}

/// POSTs artifacts as `multipart/form-data` (field `file`, `application/pdf`).
#[derive(Debug, Clone)]
pub struct HttpUploadSink {
    url: String,
    client: reqwest::Client,
}

impl HttpUploadSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| SinkError::Upload {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl OutputSink for HttpUploadSink {
    async fn deliver(
        &self,
        artifact: &Path,
        original_filename: &str,
    ) -> Result<String, SinkError> {
        let upload_err = |reason: String| SinkError::Upload {
            url: self.url.clone(),
            reason,
        };

        let data = tokio::fs::read(artifact).await.map_err(|e| SinkError::Io {
            path: artifact.to_path_buf(),
            source: e,
        })?;
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(original_filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| upload_err(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    upload_err(format!("timed out after {UPLOAD_TIMEOUT_SECS}s"))
                } else {
                    upload_err(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                url: self.url.clone(),
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        info!(url = %self.url, status = status.as_u16(), "output uploaded");
        Ok(format!("{} (HTTP {})", self.url, status.as_u16()))
    }
}

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[/\\]").unwrap());
static UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduce `name` to a safe single path component: ASCII letters, digits,
/// `_`, `.` and `-`; whitespace runs become `_`; leading and trailing `.`
/// and `_` are removed. May return an empty string.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name.chars().filter(char::is_ascii).collect();
    let spaced = SEPARATORS.replace_all(&ascii, " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE.replace_all(&joined, "");
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// `<safe_stem>_<uuid><ext>` for `original`.
fn unique_name(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .map(|s| secure_filename(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", secure_filename(&e.to_string_lossy())))
        .filter(|e| e.len() > 1)
        .unwrap_or_default();
    format!("{stem}_{}{ext}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_paths_and_symbols() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("  Q3 résumé (final).pdf "), "Q3_rsum_final.pdf");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn unique_name_keeps_stem_and_extension() {
        let name = unique_name("annual report.pdf");
        assert!(name.starts_with("annual_report_"), "got {name}");
        assert!(name.ends_with(".pdf"));
        assert_ne!(unique_name("a.pdf"), unique_name("a.pdf"));
    }

    #[test]
    fn empty_sub_folder_is_ignored() {
        let sink = LocalDirSink::new("/out").with_sub_folder("../");
        assert_eq!(sink.destination_dir(), PathBuf::from("/out"));
        let sink = LocalDirSink::new("/out").with_sub_folder("client a");
        assert_eq!(sink.destination_dir(), PathBuf::from("/out/client_a"));
    }

    #[tokio::test]
    async fn local_sink_copies_into_sub_folder() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("rebuilt.pdf");
        std::fs::write(&artifact, b"%PDF-1.5 test").unwrap();

        let sink = LocalDirSink::new(dir.path().join("out")).with_sub_folder("batch 7");
        let location = sink.deliver(&artifact, "report.pdf").await.unwrap();
        let stored = PathBuf::from(&location);
        assert!(stored.starts_with(dir.path().join("out").join("batch_7")));
        assert_eq!(std::fs::read(&stored).unwrap(), b"%PDF-1.5 test");
    }

    #[tokio::test]
    async fn upload_to_unreachable_host_fails() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("rebuilt.pdf");
        std::fs::write(&artifact, b"%PDF").unwrap();
        let sink = HttpUploadSink::new("http://127.0.0.1:9/upload").unwrap();
        let err = sink.deliver(&artifact, "rebuilt.pdf").await.unwrap_err();
        assert!(matches!(err, SinkError::Upload { .. }), "got: {err}");
    }
}
