//! Per-run scratch directory with one namespace per artifact kind.
//!
//! ```text
//! <root>/
//!   splitter/page_{n}.pdf            single-page extract (deleted after the task)
//!   images/page_{n}.png              raster image
//!   markup/page_{n}_full.html        synthesised markup
//!   markup/page_{n}_converted.pdf    rendered replacement page
//! ```
//!
//! Names are keyed by page number, so concurrent tasks never share a path
//! and no locking is needed. The root is a [`TempDir`] and disappears when
//! the [`WorkArea`] is dropped, unless the caller asked to keep it.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const SPLITTER: &str = "splitter";
const IMAGES: &str = "images";
const MARKUP: &str = "markup";

/// Private working directory of one run.
#[derive(Debug)]
pub struct WorkArea {
    root: PathBuf,
    // Dropping the TempDir removes the tree; `None` when the area is kept.
    _temp: Option<TempDir>,
}

impl WorkArea {
    /// Create the work area under `base` (system temp dir when `None`).
    pub fn create(base: Option<&Path>, keep: bool) -> Result<Self, PipelineError> {
        let base = base
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&base).map_err(|e| PipelineError::WorkArea {
            path: base.clone(),
            source: e,
        })?;

        let (root, temp) = if keep {
            let root = base.join(format!("table-rerender-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir(&root).map_err(|e| PipelineError::WorkArea {
                path: root.clone(),
                source: e,
            })?;
            (root, None)
        } else {
            let temp = tempfile::Builder::new()
                .prefix("table-rerender-")
                .tempdir_in(&base)
                .map_err(|e| PipelineError::WorkArea {
                    path: base.clone(),
                    source: e,
                })?;
            (temp.path().to_path_buf(), Some(temp))
        };

        for ns in [SPLITTER, IMAGES, MARKUP] {
            let dir = root.join(ns);
            std::fs::create_dir_all(&dir)
                .map_err(|e| PipelineError::WorkArea { path: dir, source: e })?;
        }

        debug!(root = %root.display(), keep, "work area created");
        Ok(Self { root, _temp: temp })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when the directory survives the drop of this value.
    pub fn is_kept(&self) -> bool {
        self._temp.is_none()
    }

    pub fn splitter_dir(&self) -> PathBuf {
        self.root.join(SPLITTER)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES)
    }

    pub fn markup_dir(&self) -> PathBuf {
        self.root.join(MARKUP)
    }

    /// `splitter/page_{n}.pdf`
    pub fn split_page_path(&self, page: usize) -> PathBuf {
        self.splitter_dir().join(format!("page_{page}.pdf"))
    }

    /// Output stem handed to the rasteriser: `page_{n}`.
    pub fn raster_stem(page: usize) -> String {
        format!("page_{page}")
    }

    /// `images/page_{n}.png`
    pub fn raster_path(&self, page: usize) -> PathBuf {
        self.images_dir().join(format!("{}.png", Self::raster_stem(page)))
    }

    /// `markup/page_{n}_full.html`
    pub fn markup_path(&self, page: usize) -> PathBuf {
        self.markup_dir().join(format!("page_{page}_full.html"))
    }

    /// `markup/page_{n}_converted.pdf`
    pub fn rendered_path(&self, page: usize) -> PathBuf {
        self.markup_dir().join(format!("page_{page}_converted.pdf"))
    }
}

/// Removes a scratch file when dropped, on every exit path of a task.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "could not remove scratch file: {e}"),
        }
    }
}
