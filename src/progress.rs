//! Progress-callback trait for per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as pages are classified, regenerated and merged.
//!
//! # Example
//!
//! ```rust
//! use table_rerender::{PipelineConfig, PageReport, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl RunProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: usize, total_pages: usize, report: &PageReport) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total_pages} done (page {page}, ok={})", report.success);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{PageReport, RunVerdict};
use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// Page tasks run concurrently, so `on_page_start` may be called from
/// several worker tasks at once. `on_page_complete` is only called from the
/// orchestrator's join loop, in completion order (not page order).
/// All methods have default no-op implementations.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after the source has been validated, before dispatch.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a worker picks up a page.
    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page task has finished, successfully or not.
    fn on_page_complete(&self, page: usize, total_pages: usize, report: &PageReport) {
        let _ = (page, total_pages, report);
    }

    /// Called once every page task has completed, just before merging.
    fn on_merge_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once at the end of the run.
    ///
    /// * `failed_pages`: number of pages whose task recorded a failure
    fn on_run_complete(&self, total_pages: usize, failed_pages: usize, verdict: RunVerdict) {
        let _ = (total_pages, failed_pages, verdict);
    }
}

/// No-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
