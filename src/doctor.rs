//! External dependency check (`table-rerender --check-deps`).

use crate::config::ToolPaths;
use crate::error::ToolError;
use crate::pipeline::command::run_tool;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PROBE_TIMEOUT_SECS: u64 = 10;

/// Availability of one external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub tool: String,
    /// Resolved executable, `None` when not found.
    pub path: Option<PathBuf>,
    /// First line of the tool's version banner.
    pub version: Option<String>,
}

impl DependencyStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

/// Locate pdftoppm, tesseract and wkhtmltopdf and read their versions.
pub async fn check_dependencies(tools: &ToolPaths) -> Vec<DependencyStatus> {
    let probes: [(&str, &Path, &str); 3] = [
        ("pdftoppm", &tools.pdftoppm, "-v"),
        ("tesseract", &tools.tesseract, "--version"),
        ("wkhtmltopdf", &tools.wkhtmltopdf, "--version"),
    ];

    let mut statuses = Vec::with_capacity(probes.len());
    for (name, program, flag) in probes {
        let status = match which::which(program) {
            Ok(path) => {
                let version = probe_version(&path, flag).await;
                info!(tool = name, path = %path.display(), version = ?version, "dependency found");
                DependencyStatus {
                    tool: name.to_string(),
                    path: Some(path),
                    version,
                }
            }
            Err(e) => {
                warn!(tool = name, program = %program.display(), "dependency not found: {e}");
                DependencyStatus {
                    tool: name.to_string(),
                    path: None,
                    version: None,
                }
            }
        };
        statuses.push(status);
    }
    statuses
}

/// Some tools print the banner on stderr, and older poppler builds exit
/// non-zero for `-v`, so both streams and both outcomes are considered.
async fn probe_version(program: &Path, flag: &str) -> Option<String> {
    let text = match run_tool(program, [flag], PROBE_TIMEOUT_SECS).await {
        Ok(out) => {
            let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
            if stdout.trim().is_empty() {
                String::from_utf8_lossy(&out.stderr).into_owned()
            } else {
                stdout
            }
        }
        Err(ToolError::Failed { stderr, .. }) => stderr,
        Err(_) => return None,
    };
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
