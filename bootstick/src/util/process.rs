//! External tool invocation.
//!
//! Partitioning, formatting and bootloader tools are black-box commands:
//! they either succeed or fail with diagnostic text. [`run_tool`] captures
//! both streams so the diagnostic survives into the error that surfaces to
//! the user.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Failure of an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool: String,
    /// Exit status, `None` if the tool could not be started or was killed
    pub status: Option<i32>,
    pub diagnostic: String,
}

impl ToolFailure {
    pub fn new(tool: impl Into<String>, status: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status,
            diagnostic: diagnostic.into(),
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} exited with {}", self.tool, code)?,
            None => write!(f, "{} did not run to completion", self.tool)?,
        }
        let diagnostic = self.diagnostic.trim();
        if !diagnostic.is_empty() {
            write!(f, ": {}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolFailure {}

/// Run `program` with `args`, optionally feeding `stdin`, and return its
/// stdout on success.
pub fn run_tool(program: &Path, args: &[&str], stdin: Option<&str>) -> Result<String, ToolFailure> {
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    tracing::debug!(tool = %tool, args = ?args, "Running external tool");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolFailure::new(&tool, None, format!("failed to spawn: {}", e)))?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        pipe.write_all(input.as_bytes())
            .map_err(|e| ToolFailure::new(&tool, None, format!("failed to write stdin: {}", e)))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| ToolFailure::new(&tool, None, format!("failed to wait: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr.into_owned()
    };
    Err(ToolFailure::new(tool, output.status.code(), diagnostic))
}
