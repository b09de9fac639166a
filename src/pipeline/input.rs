//! Input resolution: normalise a user-supplied path or URL to a local PDF.
//!
//! URL inputs are downloaded into a `TempDir` owned by [`ResolvedInput`], so
//! the file disappears when the run ends. The `%PDF` magic bytes and the
//! optional size limit are checked here, before anything parses the file.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the PDF lives in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// File stem used to name the output (e.g. `report` for `report.pdf`).
    pub fn stem(&self) -> String {
        self.path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// * `max_bytes` rejects larger inputs with [`PipelineError::InputTooLarge`].
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    max_bytes: Option<u64>,
) -> Result<ResolvedInput, PipelineError> {
    if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs, max_bytes).await
    } else {
        resolve_local(input, max_bytes)
    }
}

/// Resolve a local file path, validating existence, size and magic bytes.
fn resolve_local(path_str: &str, max_bytes: Option<u64>) -> Result<ResolvedInput, PipelineError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(PipelineError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(PipelineError::InvalidInput {
            input: path_str.to_string(),
        });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(_) => return Err(PipelineError::FileNotFound { path }),
    };

    if let Some(limit) = max_bytes {
        let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        if bytes > limit {
            return Err(PipelineError::InputTooLarge { path, bytes, limit });
        }
    }

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => {}
        Ok(()) => return Err(PipelineError::NotAPdf { path, magic }),
        Err(_) => {
            return Err(PipelineError::CorruptPdf {
                path,
                detail: "file is shorter than a PDF header".into(),
            })
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(
    url: &str,
    timeout_secs: u64,
    max_bytes: Option<u64>,
) -> Result<ResolvedInput, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| PipelineError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })? {
        bytes.extend_from_slice(&chunk);
        if let Some(limit) = max_bytes {
            if bytes.len() as u64 > limit {
                return Err(PipelineError::InputTooLarge {
                    path: file_path,
                    bytes: bytes.len() as u64,
                    limit,
                });
            }
        }
    }

    if bytes.len() < 4 {
        return Err(PipelineError::CorruptPdf {
            path: file_path,
            detail: format!("downloaded body is only {} bytes", bytes.len()),
        });
    }
    if &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(PipelineError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PipelineError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Pick a file name for a downloaded PDF from the last URL path segment.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if last.to_ascii_lowercase().ends_with(".pdf") && last.len() > 4 {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_prefers_pdf_segment() {
        assert_eq!(filename_from_url("https://x.org/a/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://x.org/a/download?id=3"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://x.org/"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_with_magic() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"GIF89a....").unwrap();
        let err = resolve_input(f.path().to_str().unwrap(), 5, None)
            .await
            .unwrap_err();
        match err {
            PipelineError::NotAPdf { magic, .. } => assert_eq!(&magic, b"GIF8"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn size_limit_is_enforced() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.4\n").unwrap();
        f.write_all(&[b' '; 64]).unwrap();
        let err = resolve_input(f.path().to_str().unwrap(), 5, Some(16))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputTooLarge { limit: 16, .. }), "got: {err}");

        let ok = resolve_input(f.path().to_str().unwrap(), 5, Some(1024))
            .await
            .unwrap();
        assert_eq!(ok.path(), f.path());
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = resolve_input("  ", 5, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));
    }
}
