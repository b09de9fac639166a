//! Page orchestrator: fan out one task per page, wait for all of them, merge.
//!
//! ## Phases
//!
//! ```text
//! Dispatched ──▶ AllTasksComplete ──▶ Merged ──▶ Finalized
//! ```
//!
//! Every page task is spawned onto a [`JoinSet`] up front; a task waits for
//! a [`Semaphore`] permit before doing any work, so at most
//! [`PipelineConfig::effective_workers`] pages are in flight. The join loop
//! is the completion barrier and the only place that touches run-level
//! state (page slots, failure count, progress callbacks). Merging starts
//! only after the last task has been joined.

use crate::analyzer::{GenerativeAnalyzer, TableAnalyzer};
use crate::config::{PipelineConfig, RasterBackend};
use crate::error::{PageError, PipelineError};
use crate::output::{PageReport, PipelineRun, RunVerdict};
use crate::pipeline::merge::merge_pages;
use crate::pipeline::ocr::{TesseractExtractor, TextExtractor};
use crate::pipeline::rasterize::{PopplerRasterizer, Rasterizer};
use crate::pipeline::renderer::{PageRenderer, WkhtmltopdfRenderer};
use crate::pipeline::split::SourceDocument;
use crate::pipeline::task::{run_page_task, TaskContext};
use crate::pipeline::workarea::WorkArea;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// The four external capabilities a run depends on.
#[derive(Clone)]
pub struct Adapters {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub extractor: Arc<dyn TextExtractor>,
    pub analyzer: Arc<dyn TableAnalyzer>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl Adapters {
    /// Production adapters: poppler (or pdfium), tesseract, the configured
    /// generative backend, wkhtmltopdf.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let rasterizer: Arc<dyn Rasterizer> = match config.raster_backend {
            RasterBackend::Poppler => Arc::new(PopplerRasterizer::new(
                config.tools.pdftoppm.clone(),
                config.tool_timeout_secs,
            )),
            #[cfg(feature = "pdfium")]
            RasterBackend::Pdfium => {
                Arc::new(crate::pipeline::rasterize::PdfiumRasterizer::from_env())
            }
            #[cfg(not(feature = "pdfium"))]
            RasterBackend::Pdfium => {
                return Err(PipelineError::InvalidConfig(
                    "the pdfium rasteriser needs the `pdfium` feature".to_string(),
                ))
            }
        };

        Ok(Self {
            rasterizer,
            extractor: Arc::new(TesseractExtractor::new(
                config.tools.tesseract.clone(),
                config.ocr_language.clone(),
                config.ocr_timeout_secs,
            )),
            analyzer: Arc::new(GenerativeAnalyzer::from_config(config)?),
            renderer: Arc::new(WkhtmltopdfRenderer::new(
                config.tools.wkhtmltopdf.clone(),
                config.tool_timeout_secs,
            )),
        })
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn TableAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

/// Runs the whole pipeline for one document.
pub struct Orchestrator {
    config: PipelineConfig,
    adapters: Adapters,
}

impl Orchestrator {
    /// Build with the production adapters. Fails fast on missing
    /// credentials or an unavailable rasteriser backend.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let adapters = Adapters::from_config(&config)?;
        Ok(Self { config, adapters })
    }

    /// Build with caller-supplied adapters.
    pub fn with_adapters(config: PipelineConfig, adapters: Adapters) -> Self {
        Self { config, adapters }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Rebuild `source_path` into `output_path`.
    ///
    /// Page-level failures never surface as `Err`; they are recorded in the
    /// returned [`PipelineRun`]. `Err` means the run could not start (bad
    /// source, work area) or the output could not be written.
    pub async fn run(
        &self,
        source_path: &Path,
        output_path: &Path,
    ) -> Result<PipelineRun, PipelineError> {
        let start = Instant::now();
        let progress: ProgressCallback = self
            .config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));

        let path = source_path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || SourceDocument::load(&path))
            .await
            .map_err(|e| PipelineError::Internal(format!("source load task failed: {e}")))??;
        let document = source.info();
        let total = source.page_count();

        let work = Arc::new(WorkArea::create(
            self.config.work_dir.as_deref(),
            self.config.keep_work_dir,
        )?);
        let workers = self.config.effective_workers();
        progress.on_run_start(total);

        let ctx = Arc::new(TaskContext {
            source: Arc::new(source),
            work: Arc::clone(&work),
            adapters: self.adapters.clone(),
            dpi: self.config.dpi,
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        for page in 1..=total {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&progress);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return (page, aborted(page, format!("worker pool closed: {e}"))),
                };
                progress.on_page_start(page, total);
                let report = AssertUnwindSafe(run_page_task(ctx, page))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| aborted(page, panic_message(panic.as_ref())));
                (page, report)
            });
        }
        drop(ctx);
        info!(phase = "dispatched", total, workers, "page tasks dispatched");

        let mut slots: Vec<Option<PageReport>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page, report)) => {
                    progress.on_page_complete(page, total, &report);
                    slots[page - 1] = Some(report);
                }
                Err(e) => warn!(error = %e, "page task could not be joined"),
            }
        }

        let pages: Vec<PageReport> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| aborted(i + 1, "task ended without a report".to_string()))
            })
            .collect();
        let failed: Vec<&PageReport> = pages.iter().filter(|p| !p.success).collect();
        let failed_pages = failed.len();
        let first_failure = failed.first().and_then(|p| {
            p.error
                .as_ref()
                .map(|e| format!("Page {} error: {}", p.page, e.describe()))
        });
        info!(
            phase = "all_tasks_complete",
            total,
            failed = failed_pages,
            "all page tasks complete"
        );

        progress.on_merge_start(total);
        let merge = {
            let source_path = source_path.to_path_buf();
            let output_path = output_path.to_path_buf();
            let work = Arc::clone(&work);
            tokio::task::spawn_blocking(move || merge_pages(&source_path, &work, total, &output_path))
                .await
                .map_err(|e| PipelineError::Internal(format!("merge task failed: {e}")))??
        };
        info!(
            phase = "merged",
            appended = merge.appended(),
            regenerated = merge.regenerated_pages.len(),
            issues = merge.issues.len(),
            "merge complete"
        );

        let verdict = match merge.output {
            None => RunVerdict::Failed,
            Some(_) if failed_pages == 0 && !merge.is_degraded() => RunVerdict::Success,
            Some(_) => RunVerdict::Degraded,
        };
        let summary = first_failure.or_else(|| merge.first_issue()).or_else(|| {
            (verdict == RunVerdict::Failed).then(|| "No pages could be merged.".to_string())
        });

        let total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            phase = "finalized",
            %verdict,
            total,
            failed = failed_pages,
            duration_ms = total_duration_ms,
            "run finished"
        );
        progress.on_run_complete(total, failed_pages, verdict);

        let work_dir: Option<PathBuf> = work.is_kept().then(|| work.root().to_path_buf());
        Ok(PipelineRun {
            document,
            total_pages: total,
            pages,
            failed_pages,
            output_path: merge.output.clone(),
            merge: Some(merge),
            verdict,
            summary,
            total_duration_ms,
            work_dir,
        })
    }
}

fn aborted(page: usize, detail: String) -> PageReport {
    let mut report = PageReport::new(page);
    report.fail(PageError::TaskAborted { page, detail });
    report
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"boom"), "panicked: boom");
        assert_eq!(panic_message(&String::from("bang")), "panicked: bang");
        assert_eq!(panic_message(&42u8), "panicked");
    }

    #[test]
    fn missing_credentials_fail_before_any_work() {
        let err = Orchestrator::new(PipelineConfig::default()).err().unwrap();
        assert!(matches!(err, PipelineError::ProviderNotConfigured { .. }));
    }

    #[cfg(not(feature = "pdfium"))]
    #[test]
    fn pdfium_backend_without_feature_is_invalid() {
        let config = PipelineConfig::builder()
            .api_key("k")
            .raster_backend(RasterBackend::Pdfium)
            .build()
            .unwrap();
        let err = Adapters::from_config(&config).err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
