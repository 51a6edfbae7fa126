//! Mermaid diagrams rendered with the Mermaid CLI (`mmdc`).

use async_trait::async_trait;
use page_sync_core::diagram::{DiagramError, DiagramRenderer, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// Shells out to the Mermaid CLI; images live in a scratch directory that is
/// removed when the renderer is dropped.
pub struct MermaidCli {
    command: String,
    scratch: TempDir,
}

impl MermaidCli {
    pub fn new(command: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            command: command.into(),
            scratch: tempfile::tempdir()?,
        })
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCli {
    async fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| DiagramError::Unavailable(format!("{}: {}", self.command, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(DiagramError::Unavailable(format!(
                "{} --version exited with {}",
                self.command, status
            )))
        }
    }

    async fn render(&self, source: &str, file_name: &str) -> Result<PathBuf> {
        let failed = |reason: String| DiagramError::RenderFailed {
            file_name: file_name.to_string(),
            reason,
        };

        let input = self.scratch.path().join(format!("{}.mmd", file_name));
        let output = self.scratch.path().join(file_name);
        tokio::fs::write(&input, source)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let result = Command::new(&self.command)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .args(["-b", "transparent"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !result.status.success() {
            return Err(failed(String::from_utf8_lossy(&result.stderr).trim().to_string()));
        }
        debug!("Rendered {} to {}", file_name, output.display());
        Ok(output)
    }
}
