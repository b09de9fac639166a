//! Top-level entry points.
//!
//! [`rebuild`] is what the CLI calls: resolve the input (local path or URL),
//! build the production [`Orchestrator`] and run it. Callers that need custom
//! adapters construct an [`Orchestrator`] directly.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::orchestrator::Orchestrator;
use crate::output::{DocumentInfo, PipelineRun};
use crate::pipeline::input;
use crate::pipeline::split::SourceDocument;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Rebuild a PDF file or URL into `output`.
///
/// # Arguments
/// * `input`: local file path or HTTP/HTTPS URL to a PDF
/// * `output`: where the merged document is written
/// * `config`: pipeline configuration
///
/// # Returns
/// `Ok(PipelineRun)` whenever the run got as far as merging, including
/// `Degraded` and `Failed` verdicts. Use [`PipelineRun::into_result`] to treat
/// a run without output as an error.
///
/// # Errors
/// Only fatal conditions: unreadable or non-PDF input, corrupt or empty
/// document, missing provider credentials, unwritable output.
pub async fn rebuild(
    input: impl AsRef<str>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineRun, PipelineError> {
    let input = input.as_ref();
    info!(input, "starting table re-render");

    // Credentials are checked before anything is downloaded.
    let orchestrator = Orchestrator::new(config.clone())?;

    let resolved = input::resolve_input(
        input,
        config.download_timeout_secs,
        config.max_input_bytes,
    )
    .await?;

    orchestrator.run(resolved.path(), output.as_ref()).await
}

/// Synchronous wrapper around [`rebuild`].
///
/// Creates a temporary tokio runtime internally.
pub fn rebuild_sync(
    input: impl AsRef<str>,
    output: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineRun, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(rebuild(input, output, config))
}

/// Rebuild PDF bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed when the
/// run returns.
///
/// # Example
/// ```rust,no_run
/// use table_rerender::{rebuild_from_bytes, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("report.pdf")?;
/// let config = PipelineConfig::builder().api_key("...").build()?;
/// let run = rebuild_from_bytes(&bytes, "report_rebuilt.pdf", &config).await?;
/// println!("{}: {} pages regenerated", run.verdict, run.regenerated_pages().len());
/// # Ok(())
/// # }
/// ```
pub async fn rebuild_from_bytes(
    bytes: &[u8],
    output: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineRun, PipelineError> {
    let mut tmp = tempfile::Builder::new()
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| PipelineError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| PipelineError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    rebuild(&path, output, config).await
}

/// Read document metadata without running the pipeline.
///
/// Does not require a model or API key.
pub async fn inspect(input: impl AsRef<str>) -> Result<DocumentInfo, PipelineError> {
    let resolved = input::resolve_input(input.as_ref(), 120, None).await?;
    let path = resolved.path().to_path_buf();
    tokio::task::spawn_blocking(move || SourceDocument::load(&path).map(|s| s.info()))
        .await
        .map_err(|e| PipelineError::Internal(format!("inspect task failed: {e}")))?
}
