//! Markup → page rendering.

use crate::error::ToolError;
use crate::pipeline::command::run_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Renders a markup file into a PDF page artifact.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, markup: &Path, output: &Path) -> Result<(), ToolError>;
}

/// Runs `wkhtmltopdf --enable-local-file-access --quiet <html> <pdf>`.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfRenderer {
    program: PathBuf,
    timeout_secs: u64,
}

impl WkhtmltopdfRenderer {
    pub fn new(program: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl PageRenderer for WkhtmltopdfRenderer {
    async fn render(&self, markup: &Path, output: &Path) -> Result<(), ToolError> {
        let args: Vec<OsString> = vec![
            "--enable-local-file-access".into(),
            "--quiet".into(),
            markup.into(),
            output.into(),
        ];
        run_tool(&self.program, args, self.timeout_secs).await?;

        // wkhtmltopdf can exit 0 after a load error and leave nothing behind.
        match tokio::fs::metadata(output).await {
            Ok(m) if m.len() > 0 => {
                debug!(output = %output.display(), bytes = m.len(), "markup rendered");
                Ok(())
            }
            _ => Err(ToolError::NotFound {
                expected: output.to_path_buf(),
            }),
        }
    }
}
