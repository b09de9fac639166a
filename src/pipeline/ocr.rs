//! Text extraction from a page image.

use crate::error::ToolError;
use crate::pipeline::command::run_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extracts the text of a raster image.
///
/// Empty text is a valid result (`Ok("")`), not an error.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &Path) -> Result<String, ToolError>;
}

/// Runs `tesseract <image> stdout -l <lang>`.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    program: PathBuf,
    language: String,
    timeout_secs: u64,
}

impl TesseractExtractor {
    pub fn new(program: impl Into<PathBuf>, language: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            language: language.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, image: &Path) -> Result<String, ToolError> {
        let args: Vec<OsString> = vec![
            image.into(),
            "stdout".into(),
            "-l".into(),
            self.language.as_str().into(),
        ];
        let output = run_tool(&self.program, args, self.timeout_secs).await?;
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(image = %image.display(), chars = text.len(), "OCR finished");
        Ok(text)
    }
}
