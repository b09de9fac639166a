//! Running external tools with a time budget.

use crate::error::ToolError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt kept in a [`ToolError::Failed`].
const STDERR_EXCERPT: usize = 2_000;

/// Run `program` with `args`, killing it after `timeout_secs`.
///
/// A non-zero exit becomes [`ToolError::Failed`] carrying the stderr excerpt.
pub(crate) async fn run_tool<I, S>(
    program: &Path,
    args: I,
    timeout_secs: u64,
) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program.display().to_string();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

    // On timeout the future (and the child with it) is dropped, which kills it.
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout {
            tool: tool.clone(),
            secs: timeout_secs,
        })?
        .map_err(|source| ToolError::Io {
            path: program.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            tool,
            status: output.status.to_string(),
            stderr: excerpt(stderr.trim()),
        });
    }

    debug!(tool = %tool, "tool finished");
    Ok(output)
}

fn excerpt(s: &str) -> String {
    if s.len() <= STDERR_EXCERPT {
        return s.to_string();
    }
    let mut end = STDERR_EXCERPT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
