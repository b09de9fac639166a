//! Error types for the table-rerender library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] is **fatal**: the run cannot proceed at all (bad input
//!   file, corrupt PDF, provider not configured, nothing could be merged).
//!   Returned as `Err(PipelineError)` from the top-level entry points.
//!
//! * [`PageError`] is **non-fatal**: a single page failed (rasteriser crash,
//!   OCR timeout, blocked model response) but every other page is fine.
//!   Stored inside [`crate::output::PageReport`]; the page falls back to its
//!   original content in the merged output.
//!
//! The adapter-level types ([`ToolError`], [`GenerationError`],
//! [`ClassifyError`], [`SynthesisError`], [`SplitError`]) are what the
//! individual stages return. The page task wraps them into a [`PageError`]
//! with the page number attached, so nothing below the orchestrator ever
//! unwinds a run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the table-rerender library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The input is larger than the configured limit.
    #[error("Input '{path}' is {bytes} bytes, limit is {limit} bytes")]
    InputTooLarge { path: PathBuf, bytes: u64, limit: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt or encrypted: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The PDF parsed but has no pages.
    #[error("PDF '{path}' contains no pages")]
    EmptyDocument { path: PathBuf },

    /// No page, regenerated or original, could be appended to the output.
    #[error("No pages could be merged out of {total}.\nFirst error: {first_error}")]
    NothingMerged { total: usize, first_error: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The generative provider is not initialised (missing API key etc.).
    #[error("Generative provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The per-run work area could not be created.
    #[error("Failed to prepare work area '{path}': {source}")]
    WorkArea {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output PDF.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::PageReport`]. The page keeps its original
/// content in the merged output; the run continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// The page could not be extracted into its own single-page PDF.
    #[error("Page {page}: split failed: {detail}")]
    Split { page: usize, detail: String },

    /// Rasterisation failed or produced no image.
    #[error("Page {page}: rasterisation failed: {detail}")]
    Rasterize { page: usize, detail: String },

    /// OCR crashed or timed out. Empty text is not an error.
    #[error("Page {page}: OCR failed: {detail}")]
    Ocr { page: usize, detail: String },

    /// Table classification failed. `raw` holds the offending model output
    /// when the response was malformed.
    #[error("Page {page}: table detection failed: {detail}")]
    Classify {
        page: usize,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },

    /// Markup synthesis failed.
    #[error("Page {page}: markup generation failed: {detail}")]
    Synthesize { page: usize, detail: String },

    /// The synthesised markup could not be written to the work area.
    #[error("Page {page}: markup save failed: {detail}")]
    MarkupWrite { page: usize, detail: String },

    /// Markup-to-PDF conversion failed. Recorded but not counted as a page
    /// failure; the merger substitutes the original page.
    #[error("Page {page}: markup rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// The page task panicked or was cancelled.
    #[error("Page {page}: task aborted: {detail}")]
    TaskAborted { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Split { page, .. }
            | PageError::Rasterize { page, .. }
            | PageError::Ocr { page, .. }
            | PageError::Classify { page, .. }
            | PageError::Synthesize { page, .. }
            | PageError::MarkupWrite { page, .. }
            | PageError::Render { page, .. }
            | PageError::TaskAborted { page, .. } => *page,
        }
    }

    /// The message without its `Page N: ` prefix.
    pub fn describe(&self) -> String {
        let full = self.to_string();
        match full.split_once(": ") {
            Some((_, rest)) => rest.to_string(),
            None => full,
        }
    }
}

/// Failure of an external tool adapter (rasteriser, OCR, renderer).
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool binary could not be started.
    #[error("failed to start '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran past its time budget and was killed.
    #[error("'{tool}' timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    /// The tool exited unsuccessfully.
    #[error("'{tool}' exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The tool reported success but the expected artifact is missing.
    #[error("expected output '{expected}' (or a sequence-suffixed variant) not found")]
    NotFound { expected: PathBuf },

    /// Filesystem error around the tool invocation.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// In-process backend error (pdfium, image decoding).
    #[error("{0}")]
    Backend(String),
}

/// Errors from the page splitter.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Zero-based index outside `[0, page_count)`.
    #[error("page index {index} is out of range for a document with {page_count} pages")]
    IndexOutOfRange { index: usize, page_count: usize },

    /// The PDF object graph could not be rewritten into a single page.
    #[error("PDF structure error: {0}")]
    Structure(String),

    /// The single-page artifact could not be persisted.
    #[error("failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },
}

/// Transport-level failure of a generative endpoint call. All variants are
/// considered transient by the classifier's retry loop.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network failure, timeout, or provider SDK error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The raw response body was not the expected JSON envelope.
    #[error("malformed response body: {0}")]
    MalformedBody(String),

    /// The request could not be built (e.g. unreadable image).
    #[error("request error: {0}")]
    Request(String),
}

/// Table classifier failure.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Empty response with a non-STOP finish/block reason. Never retried.
    #[error("response empty or blocked (reason: {reason})")]
    Blocked { reason: String },

    /// Model text was not a JSON object. Never retried.
    #[error("failed to parse response as JSON: {detail}")]
    Parse { detail: String, raw: String },

    /// JSON object missing a required field or with a wrong type.
    #[error("invalid table detection response: {detail}")]
    Invalid { detail: String, raw: String },

    /// Every attempt failed with a transient error.
    #[error("call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The prompt template could not be filled.
    #[error("prompt error: {0}")]
    Prompt(String),
}

impl ClassifyError {
    /// Raw model output kept for diagnosis, when there is one.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ClassifyError::Parse { raw, .. } | ClassifyError::Invalid { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Markup synthesizer failure.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Empty response with a non-STOP finish/block reason.
    #[error("response empty or blocked (reason: {reason})")]
    Blocked { reason: String },

    /// Normal stop but no content at all.
    #[error("response contained no content")]
    Empty,

    /// Endpoint call failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The raster image could not be loaded or encoded.
    #[error("image error for '{path}': {detail}")]
    Image { path: PathBuf, detail: String },

    /// The prompt template could not be filled.
    #[error("prompt error: {0}")]
    Prompt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_merged_display() {
        let e = PipelineError::NothingMerged {
            total: 5,
            first_error: "Page 1 could not be extracted".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("out of 5"), "got: {msg}");
        assert!(msg.contains("Page 1"));
    }

    #[test]
    fn provider_not_configured_display() {
        let e = PipelineError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "Set GEMINI_API_KEY".into(),
        };
        assert!(e.to_string().contains("gemini"));
        assert!(e.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn page_error_reports_page_number() {
        let e = PageError::Classify {
            page: 7,
            detail: "bad".into(),
            raw: Some("{".into()),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().starts_with("Page 7"));
        assert_eq!(e.describe(), "table detection failed: bad");
    }

    #[test]
    fn page_error_serialises_with_kind_tag() {
        let e = PageError::Render {
            page: 3,
            detail: "wkhtmltopdf exited with 1".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"render\""), "got: {json}");
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn classify_error_keeps_raw_text() {
        let e = ClassifyError::Parse {
            detail: "expected value".into(),
            raw: "not json".into(),
        };
        assert_eq!(e.raw(), Some("not json"));
        assert_eq!(
            ClassifyError::Blocked {
                reason: "SAFETY".into()
            }
            .raw(),
            None
        );
    }

    #[test]
    fn tool_timeout_display() {
        let e = ToolError::Timeout {
            tool: "tesseract".into(),
            secs: 60,
        };
        assert_eq!(e.to_string(), "'tesseract' timed out after 60s");
    }
}
