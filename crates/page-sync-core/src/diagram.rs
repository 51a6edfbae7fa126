//! Diagram blocks embedded in documents.
//!
//! Fenced ```` ```mermaid ```` blocks can be rendered to images and attached
//! to the page. Rendering happens outside the engine through
//! `DiagramRenderer`; `MermaidCli` (in page-sync) shells out to `mmdc`.
//! `InMemoryRenderer` is the test double.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::hashing::ContentHash;

#[derive(Debug, Error)]
pub enum DiagramError {
    /// The renderer cannot run at all (missing binary, ...)
    #[error("Diagram renderer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to render diagram {file_name}: {reason}")]
    RenderFailed { file_name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DiagramError>;

/// One diagram source block, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBlock {
    pub index: usize,
    pub source: String,
    /// Digest of `source`
    pub digest: String,
}

impl DiagramBlock {
    /// Attachment file name, stable for identical sources.
    pub fn attachment_name(&self) -> String {
        format!("diagram-{}.png", &self.digest[..12])
    }
}

/// A rendered diagram that has been attached to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramAttachment {
    pub file_name: String,
    pub digest: String,
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    /// Verify the renderer can run. Checked before any remote write.
    async fn ensure_available(&self) -> Result<()>;

    /// Render `source` to an image file named `file_name`, returning its path.
    async fn render(&self, source: &str, file_name: &str) -> Result<PathBuf>;
}

pub(crate) fn is_fence(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    trimmed
        .strip_prefix("```")
        .or_else(|| trimmed.strip_prefix("~~~"))
        .map(str::trim)
}

/// Extract every fenced mermaid block from a markdown body.
pub fn extract_diagrams(raw: &str) -> Vec<DiagramBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    let mut in_other_fence = false;

    for line in raw.lines() {
        let fence = is_fence(line);

        if let Some(lines) = current.as_mut() {
            if fence.is_some_and(str::is_empty) {
                let source = lines.join("\n");
                blocks.push(DiagramBlock {
                    index: blocks.len(),
                    digest: ContentHash::from_bytes(source.as_bytes()).into_string(),
                    source,
                });
                current = None;
            } else {
                lines.push(line);
            }
            continue;
        }

        match fence {
            // A closing fence carries no info string
            Some(info) if in_other_fence => in_other_fence = !info.is_empty(),
            Some(info) if info.eq_ignore_ascii_case("mermaid") => current = Some(Vec::new()),
            Some(_) => in_other_fence = true,
            None => {}
        }
    }

    blocks
}

pub fn has_diagrams(raw: &str) -> bool {
    !extract_diagrams(raw).is_empty()
}

/// Renderer double for testing: "renders" to a bare file name.
pub struct InMemoryRenderer {
    available: bool,
    rendered: Mutex<Vec<String>>,
}

impl InMemoryRenderer {
    pub fn new() -> Self {
        Self {
            available: true,
            rendered: Mutex::new(Vec::new()),
        }
    }

    /// A renderer whose availability check fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// File names rendered so far, in order.
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

impl Default for InMemoryRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiagramRenderer for InMemoryRenderer {
    async fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(DiagramError::Unavailable("renderer disabled".to_string()))
        }
    }

    async fn render(&self, _source: &str, file_name: &str) -> Result<PathBuf> {
        self.rendered.lock().unwrap().push(file_name.to_string());
        Ok(PathBuf::from(file_name))
    }
}
