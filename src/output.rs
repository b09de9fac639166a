//! Result types produced by a run: per-page reports, the merge report and
//! the overall [`PipelineRun`].
//!
//! Everything here is `Serialize` so callers (and the CLI's `--json` flag)
//! can persist a run record as-is.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of the table classifier for one page.
///
/// Serialised with the model's wire names so a stored report can be compared
/// with the raw endpoint output directly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    #[serde(rename = "tableDetected")]
    pub table_detected: bool,
    /// Nominally in [0, 1]; out-of-range values are accepted and logged.
    #[serde(rename = "confidenceScore")]
    pub confidence_score: f64,
}

impl ClassificationResult {
    /// The result used for pages with no extractable text.
    pub const NO_TABLE: ClassificationResult = ClassificationResult {
        table_detected: false,
        confidence_score: 0.0,
    };
}

/// How the classification for a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    /// The generative endpoint was called and returned a valid result.
    Classified,
    /// OCR produced no text; no endpoint call was made.
    EmptyInput,
    /// The page never reached classification (or classification failed).
    #[default]
    NotRun,
}

/// Record of one page task. Built by the worker that ran the page and handed
/// back to the orchestrator by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    /// 1-based page number.
    pub page: usize,

    /// Raster image in the work area, when rasterisation succeeded.
    pub raster_path: Option<PathBuf>,

    /// Character count of the OCR text.
    pub text_chars: usize,

    pub classification: Option<ClassificationResult>,

    pub classification_status: ClassificationStatus,

    /// Synthesised markup in the work area.
    pub markup_path: Option<PathBuf>,

    /// Rendered replacement page in the work area.
    pub rendered_path: Option<PathBuf>,

    /// `false` when any stage up to and including markup persistence failed.
    pub success: bool,

    /// The failure that ended the task early, if any.
    pub error: Option<PageError>,

    /// Markup rendering failure. Does not clear `success`.
    pub render_error: Option<PageError>,

    /// Wall-clock time of the task in milliseconds.
    pub duration_ms: u64,
}

impl PageReport {
    pub fn new(page: usize) -> Self {
        Self {
            page,
            raster_path: None,
            text_chars: 0,
            classification: None,
            classification_status: ClassificationStatus::NotRun,
            markup_path: None,
            rendered_path: None,
            success: true,
            error: None,
            render_error: None,
            duration_ms: 0,
        }
    }

    /// Mark the task as failed with `error`.
    pub fn fail(&mut self, error: PageError) {
        self.success = false;
        self.error = Some(error);
    }

    /// True when the classifier reported a table on this page.
    pub fn table_detected(&self) -> bool {
        self.classification
            .map(|c| c.table_detected)
            .unwrap_or(false)
    }
}

/// Why a page could not be merged as planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeIssueKind {
    /// A regeneration was attempted but unusable; the original page was used.
    FellBackToOriginal,
    /// The original page could not be extracted; the page was left out.
    Skipped,
}

/// A degraded substitution recorded by the merger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeIssue {
    pub page: usize,
    pub kind: MergeIssueKind,
    pub detail: String,
}

/// Result of the merge stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Final artifact; `None` when zero pages were appended.
    pub output: Option<PathBuf>,
    /// Pages taken from a rendered replacement.
    pub regenerated_pages: Vec<usize>,
    /// Pages taken from the source document.
    pub original_pages: Vec<usize>,
    /// Fallbacks and skips, in page order.
    pub issues: Vec<MergeIssue>,
}

impl MergeReport {
    /// Number of pages in the output document.
    pub fn appended(&self) -> usize {
        self.regenerated_pages.len() + self.original_pages.len()
    }

    /// True when any page fell back or was skipped.
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Human-readable description of the first merge problem.
    pub fn first_issue(&self) -> Option<String> {
        self.issues
            .first()
            .map(|i| format!("Page {} merge issue: {}", i.page, i.detail))
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// Every page succeeded and the merge had no degraded substitutions.
    Success,
    /// An output was produced but some page failed or fell back.
    Degraded,
    /// No output was produced.
    Failed,
}

impl std::fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunVerdict::Success => "success",
            RunVerdict::Degraded => "degraded",
            RunVerdict::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Document-level metadata read from the source PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub pdf_version: String,
    pub file_size: u64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
}

/// Complete record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub document: DocumentInfo,
    pub total_pages: usize,
    /// One report per page, ordered 1..=N.
    pub pages: Vec<PageReport>,
    pub failed_pages: usize,
    pub merge: Option<MergeReport>,
    pub output_path: Option<PathBuf>,
    pub verdict: RunVerdict,
    /// First failing page, else first merge problem. `None` on success.
    pub summary: Option<String>,
    pub total_duration_ms: u64,
    /// Work area left on disk when `keep_work_dir` was set.
    pub work_dir: Option<PathBuf>,
}

impl PipelineRun {
    /// Pages whose replacement made it into the output.
    pub fn regenerated_pages(&self) -> &[usize] {
        self.merge
            .as_ref()
            .map(|m| m.regenerated_pages.as_slice())
            .unwrap_or(&[])
    }

    /// Convert a `Failed` run into an error, keep everything else.
    pub fn into_result(self) -> Result<PipelineRun, crate::error::PipelineError> {
        if self.verdict == RunVerdict::Failed {
            return Err(crate::error::PipelineError::NothingMerged {
                total: self.total_pages,
                first_error: self
                    .summary
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(self)
    }
}
