//! # table-rerender
//!
//! Rebuild PDF documents whose tables came out of a scanner or exporter
//! badly. Each page is rasterised and OCR'd; a generative model decides
//! whether the page holds a table, and if it does, writes an HTML replica of
//! the whole page from the image and the OCR text. The replica is rendered
//! back to PDF and takes the original page's place. Pages without tables
//! pass through untouched.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL, check %PDF magic
//!  ├─ 2. Dispatch   one task per page, at most `max_workers` at a time
//!  │      ├─ split       single-page PDF (lopdf, spawn_blocking)
//!  │      ├─ rasterize   pdftoppm / pdfium at 300 DPI
//!  │      ├─ ocr         tesseract, 60 s budget
//!  │      ├─ classify    model, JSON verdict, retried with backoff
//!  │      ├─ synthesize  model, image + OCR text → HTML
//!  │      └─ render      wkhtmltopdf
//!  ├─ 3. Barrier    wait for every page task
//!  └─ 4. Merge      regenerated page where usable, original otherwise
//! ```
//!
//! A page that fails anywhere keeps its original content. The run reports a
//! [`RunVerdict`]: `Success`, `Degraded` (output written, something fell
//! back) or `Failed` (nothing could be merged).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use table_rerender::{rebuild, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .build()?;
//!     let run = rebuild("statement.pdf", "statement_rebuilt.pdf", &config).await?;
//!     eprintln!(
//!         "{}: {}/{} pages regenerated",
//!         run.verdict,
//!         run.regenerated_pages().len(),
//!         run.total_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `table-rerender` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | off     | In-process rasteriser via `pdfium-render` instead of `pdftoppm` |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! table-rerender = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyzer;
pub mod config;
pub mod convert;
pub mod doctor;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sink;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyzer::{GenerativeAnalyzer, TableAnalyzer};
pub use config::{PipelineConfig, PipelineConfigBuilder, RasterBackend, RetryPolicy, ToolPaths};
pub use convert::{inspect, rebuild, rebuild_from_bytes, rebuild_sync};
pub use doctor::{check_dependencies, DependencyStatus};
pub use error::{PageError, PipelineError};
pub use orchestrator::{Adapters, Orchestrator};
pub use output::{
    ClassificationResult, ClassificationStatus, DocumentInfo, MergeIssue, MergeIssueKind,
    MergeReport, PageReport, PipelineRun, RunVerdict,
};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use sink::{HttpUploadSink, LocalDirSink, OutputSink, SinkError};
