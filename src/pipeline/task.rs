//! One page, start to finish.
//!
//! A task owns the artifacts of its page inside the shared [`WorkArea`] and
//! reports back a [`PageReport`] by value. Every error stops at this
//! boundary: the report records it and the page falls back to the original
//! during merge. The split page file is removed on every exit path.

use crate::error::PageError;
use crate::orchestrator::Adapters;
use crate::output::{ClassificationStatus, PageReport};
use crate::pipeline::classify::{classify_page, ClassifyOutcome};
use crate::pipeline::split::SourceDocument;
use crate::pipeline::workarea::{ScratchFile, WorkArea};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a page task needs, shared by all tasks of a run.
pub struct TaskContext {
    pub source: Arc<SourceDocument>,
    pub work: Arc<WorkArea>,
    pub adapters: Adapters,
    pub dpi: u32,
}

/// Run all stages for `page` (1-based). Never fails; see [`PageReport::error`].
pub async fn run_page_task(ctx: Arc<TaskContext>, page: usize) -> PageReport {
    let start = Instant::now();
    let mut report = PageReport::new(page);

    if let Err(e) = run_stages(&ctx, page, &mut report).await {
        warn!(page, error = %e, "page task failed");
        report.fail(e);
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        page,
        duration_ms = report.duration_ms,
        success = report.success,
        table_detected = report.table_detected(),
        regenerated = report.rendered_path.is_some(),
        "page task finished"
    );
    report
}

async fn run_stages(
    ctx: &TaskContext,
    page: usize,
    report: &mut PageReport,
) -> Result<(), PageError> {
    // Guard first, so a half-written split file is removed too.
    let split = ScratchFile::new(ctx.work.split_page_path(page));

    let source = Arc::clone(&ctx.source);
    let split_path = split.path().to_path_buf();
    tokio::task::spawn_blocking(move || source.split_page(page - 1, &split_path))
        .await
        .map_err(|e| PageError::Split {
            page,
            detail: format!("split task panicked: {e}"),
        })?
        .map_err(|e| PageError::Split {
            page,
            detail: e.to_string(),
        })?;

    let raster = ctx
        .adapters
        .rasterizer
        .rasterize(
            split.path(),
            &ctx.work.images_dir(),
            &WorkArea::raster_stem(page),
            ctx.dpi,
        )
        .await
        .map_err(|e| PageError::Rasterize {
            page,
            detail: e.to_string(),
        })?;
    report.raster_path = Some(raster.clone());
    drop(split);

    let text = ctx
        .adapters
        .extractor
        .extract(&raster)
        .await
        .map_err(|e| PageError::Ocr {
            page,
            detail: e.to_string(),
        })?;
    report.text_chars = text.chars().count();
    debug!(page, chars = report.text_chars, "page text extracted");

    let outcome = classify_page(ctx.adapters.analyzer.as_ref(), page, &text)
        .await
        .map_err(|e| PageError::Classify {
            page,
            raw: e.raw().map(str::to_string),
            detail: e.to_string(),
        })?;
    report.classification = Some(outcome.result());
    report.classification_status = match outcome {
        ClassifyOutcome::Classified(_) => ClassificationStatus::Classified,
        ClassifyOutcome::EmptyInput(_) => ClassificationStatus::EmptyInput,
    };
    if !outcome.result().table_detected {
        return Ok(());
    }

    let markup = ctx
        .adapters
        .analyzer
        .synthesize(&raster, &text)
        .await
        .map_err(|e| PageError::Synthesize {
            page,
            detail: e.to_string(),
        })?;
    let Some(markup) = markup else {
        warn!(page, "no usable markup, keeping original page");
        return Ok(());
    };

    let markup_path = ctx.work.markup_path(page);
    tokio::fs::write(&markup_path, markup.as_bytes())
        .await
        .map_err(|e| PageError::MarkupWrite {
            page,
            detail: format!("{}: {e}", markup_path.display()),
        })?;
    report.markup_path = Some(markup_path.clone());

    let rendered = ctx.work.rendered_path(page);
    match ctx.adapters.renderer.render(&markup_path, &rendered).await {
        Ok(()) => report.rendered_path = Some(rendered),
        Err(e) => {
            warn!(page, error = %e, "markup rendering failed, original page will be used");
            report.render_error = Some(PageError::Render {
                page,
                detail: e.to_string(),
            });
        }
    }
    Ok(())
}
