//! Remote page service capability.
//!
//! The engine only talks to the remote service through `PageClient`.
//! Implementations:
//! - `InMemoryPageClient` - For testing
//! - `ConfluenceClient` (in page-sync) - REST over HTTP

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Page not found: {0}")]
    NotFound(String),

    /// The page exists but cannot be modified (archived, restricted, ...)
    #[error("Page {page_id} cannot be modified: {message}")]
    Forbidden { page_id: String, message: String },

    /// Another page in the space already owns this title
    #[error("A page titled '{title}' already exists")]
    TitleConflict { title: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, RemoteError::Forbidden { .. })
    }

    pub fn is_title_conflict(&self) -> bool {
        matches!(self, RemoteError::TitleConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// A remote page as seen through the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub parent_id: Option<String>,
    pub version: u64,
}

/// An attachment stored on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub page_id: String,
    pub file_name: String,
}

/// Narrow capability over the remote page service.
#[async_trait]
pub trait PageClient: Send + Sync {
    /// Create a top-level page in `space`.
    async fn create_page(&self, space: &str, title: &str, content: &str) -> Result<Page>;

    /// Create a page under `parent_id`.
    async fn create_page_with_parent(
        &self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: &str,
    ) -> Result<Page>;

    /// Replace title and content of an existing page.
    ///
    /// Must return `RemoteError::Forbidden` when the page cannot be modified.
    async fn update_page(&self, page_id: &str, title: &str, content: &str) -> Result<Page>;

    /// Look a page up by exact title. `Ok(None)` when there is none.
    async fn find_page_by_title(&self, space: &str, title: &str) -> Result<Option<Page>>;

    async fn get_page(&self, page_id: &str) -> Result<Page>;

    async fn get_child_pages(&self, page_id: &str) -> Result<Vec<Page>>;

    async fn upload_attachment(&self, page_id: &str, file_path: &Path) -> Result<Attachment>;
}

#[async_trait]
impl<T: PageClient + ?Sized> PageClient for std::sync::Arc<T> {
    async fn create_page(&self, space: &str, title: &str, content: &str) -> Result<Page> {
        (**self).create_page(space, title, content).await
    }

    async fn create_page_with_parent(
        &self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: &str,
    ) -> Result<Page> {
        (**self)
            .create_page_with_parent(space, title, content, parent_id)
            .await
    }

    async fn update_page(&self, page_id: &str, title: &str, content: &str) -> Result<Page> {
        (**self).update_page(page_id, title, content).await
    }

    async fn find_page_by_title(&self, space: &str, title: &str) -> Result<Option<Page>> {
        (**self).find_page_by_title(space, title).await
    }

    async fn get_page(&self, page_id: &str) -> Result<Page> {
        (**self).get_page(page_id).await
    }

    async fn get_child_pages(&self, page_id: &str) -> Result<Vec<Page>> {
        (**self).get_child_pages(page_id).await
    }

    async fn upload_attachment(&self, page_id: &str, file_path: &Path) -> Result<Attachment> {
        (**self).upload_attachment(page_id, file_path).await
    }
}

/// Create under `parent_id` when there is one, at the space root otherwise.
pub async fn create_page_under<C: PageClient + ?Sized>(
    client: &C,
    space: &str,
    title: &str,
    content: &str,
    parent_id: Option<&str>,
) -> Result<Page> {
    match parent_id {
        Some(parent) => {
            client
                .create_page_with_parent(space, title, content, parent)
                .await
        }
        None => client.create_page(space, title, content).await,
    }
}

#[derive(Debug, Clone)]
struct StoredPage {
    page: Page,
    content: String,
}

/// Call counters for asserting on network behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub creates: usize,
    pub updates: usize,
    pub lookups: usize,
    pub gets: usize,
    pub child_listings: usize,
    pub uploads: usize,
}

impl CallCounts {
    /// Number of calls that wrote pages.
    pub fn writes(&self) -> usize {
        self.creates + self.updates
    }
}

#[derive(Default)]
struct InMemoryState {
    pages: BTreeMap<String, StoredPage>,
    attachments: Vec<Attachment>,
    forbidden: HashSet<String>,
    fail_lookups: bool,
    next_id: u64,
    calls: CallCounts,
}

impl InMemoryState {
    fn title_taken(&self, space: &str, title: &str) -> bool {
        self.pages
            .values()
            .any(|p| p.page.space_key == space && p.page.title == title)
    }

    fn insert(
        &mut self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Page> {
        self.calls.creates += 1;
        if self.title_taken(space, title) {
            return Err(RemoteError::TitleConflict {
                title: title.to_string(),
            });
        }
        if let Some(parent) = parent_id {
            if !self.pages.contains_key(parent) {
                return Err(RemoteError::NotFound(parent.to_string()));
            }
        }

        self.next_id += 1;
        let page = Page {
            id: self.next_id.to_string(),
            title: title.to_string(),
            space_key: space.to_string(),
            parent_id: parent_id.map(String::from),
            version: 1,
        };
        self.pages.insert(
            page.id.clone(),
            StoredPage {
                page: page.clone(),
                content: content.to_string(),
            },
        );
        Ok(page)
    }
}

/// In-memory page service for testing.
///
/// Titles are unique per space, like the real service.
#[derive(Default)]
pub struct InMemoryPageClient {
    state: Mutex<InMemoryState>,
}

impl InMemoryPageClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap()
    }

    /// All subsequent updates of `page_id` fail with `Forbidden`.
    pub fn mark_forbidden(&self, page_id: &str) {
        self.state().forbidden.insert(page_id.to_string());
    }

    /// Make `find_page_by_title` and `get_page` fail with a transport error.
    pub fn fail_lookups(&self, fail: bool) {
        self.state().fail_lookups = fail;
    }

    /// Rename a page behind the engine's back.
    pub fn rename_page(&self, page_id: &str, title: &str) {
        if let Some(stored) = self.state().pages.get_mut(page_id) {
            stored.page.title = title.to_string();
            stored.page.version += 1;
        }
    }

    /// Delete a page behind the engine's back.
    pub fn delete_page(&self, page_id: &str) {
        self.state().pages.remove(page_id);
    }

    /// Seed a page directly, bypassing call counters.
    pub fn seed_page(&self, space: &str, title: &str, parent_id: Option<&str>) -> Page {
        let mut state = self.state();
        state.next_id += 1;
        let page = Page {
            id: state.next_id.to_string(),
            title: title.to_string(),
            space_key: space.to_string(),
            parent_id: parent_id.map(String::from),
            version: 1,
        };
        state.pages.insert(
            page.id.clone(),
            StoredPage {
                page: page.clone(),
                content: String::new(),
            },
        );
        page
    }

    pub fn page(&self, page_id: &str) -> Option<Page> {
        self.state()
            .pages
            .get(page_id)
            .map(|p| p.page.clone())
    }

    pub fn content(&self, page_id: &str) -> Option<String> {
        self.state()
            .pages
            .get(page_id)
            .map(|p| p.content.clone())
    }

    pub fn page_by_title(&self, space: &str, title: &str) -> Option<Page> {
        self.state()
            .pages
            .values()
            .find(|p| p.page.space_key == space && p.page.title == title)
            .map(|p| p.page.clone())
    }

    pub fn pages(&self) -> Vec<Page> {
        self.state()
            .pages
            .values()
            .map(|p| p.page.clone())
            .collect()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.state().attachments.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn reset_calls(&self) {
        self.state().calls = CallCounts::default();
    }
}

#[async_trait]
impl PageClient for InMemoryPageClient {
    async fn create_page(&self, space: &str, title: &str, content: &str) -> Result<Page> {
        self.state().insert(space, title, content, None)
    }

    async fn create_page_with_parent(
        &self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: &str,
    ) -> Result<Page> {
        self.state()
            .insert(space, title, content, Some(parent_id))
    }

    async fn update_page(&self, page_id: &str, title: &str, content: &str) -> Result<Page> {
        let mut state = self.state();
        state.calls.updates += 1;

        if state.forbidden.contains(page_id) {
            return Err(RemoteError::Forbidden {
                page_id: page_id.to_string(),
                message: "page is archived".to_string(),
            });
        }

        let space = match state.pages.get(page_id) {
            Some(stored) => stored.page.space_key.clone(),
            None => return Err(RemoteError::NotFound(page_id.to_string())),
        };
        let conflict = state
            .pages
            .values()
            .any(|p| p.page.id != page_id && p.page.space_key == space && p.page.title == title);
        if conflict {
            return Err(RemoteError::TitleConflict {
                title: title.to_string(),
            });
        }

        let stored = state
            .pages
            .get_mut(page_id)
            .ok_or_else(|| RemoteError::NotFound(page_id.to_string()))?;
        stored.page.title = title.to_string();
        stored.page.version += 1;
        stored.content = content.to_string();
        Ok(stored.page.clone())
    }

    async fn find_page_by_title(&self, space: &str, title: &str) -> Result<Option<Page>> {
        let mut state = self.state();
        state.calls.lookups += 1;
        if state.fail_lookups {
            return Err(RemoteError::Transport("lookup failed".to_string()));
        }
        Ok(state
            .pages
            .values()
            .find(|p| p.page.space_key == space && p.page.title == title)
            .map(|p| p.page.clone()))
    }

    async fn get_page(&self, page_id: &str) -> Result<Page> {
        let mut state = self.state();
        state.calls.gets += 1;
        if state.fail_lookups {
            return Err(RemoteError::Transport("lookup failed".to_string()));
        }
        state
            .pages
            .get(page_id)
            .map(|p| p.page.clone())
            .ok_or_else(|| RemoteError::NotFound(page_id.to_string()))
    }

    async fn get_child_pages(&self, page_id: &str) -> Result<Vec<Page>> {
        let mut state = self.state();
        state.calls.child_listings += 1;
        if !state.pages.contains_key(page_id) {
            return Err(RemoteError::NotFound(page_id.to_string()));
        }
        Ok(state
            .pages
            .values()
            .filter(|p| p.page.parent_id.as_deref() == Some(page_id))
            .map(|p| p.page.clone())
            .collect())
    }

    async fn upload_attachment(&self, page_id: &str, file_path: &Path) -> Result<Attachment> {
        let mut state = self.state();
        state.calls.uploads += 1;
        if !state.pages.contains_key(page_id) {
            return Err(RemoteError::NotFound(page_id.to_string()));
        }
        let file_name = file_name_of(file_path);
        state.next_id += 1;
        let attachment = Attachment {
            id: format!("att{}", state.next_id),
            page_id: page_id.to_string(),
            file_name,
        };
        state.attachments.push(attachment.clone());
        Ok(attachment)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_titles_unique_per_space() {
        let client = InMemoryPageClient::new();
        client.create_page("DOC", "Guide", "a").await.unwrap();

        let err = client.create_page("DOC", "Guide", "b").await.unwrap_err();
        assert!(err.is_title_conflict());

        // Same title in another space is fine
        client.create_page("OTHER", "Guide", "c").await.unwrap();
    }

    #[tokio::test]
    async fn test_find_by_title_absent_is_none() {
        let client = InMemoryPageClient::new();
        assert!(client.find_page_by_title("DOC", "Nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forbidden_update() {
        let client = InMemoryPageClient::new();
        let page = client.create_page("DOC", "Guide", "a").await.unwrap();
        client.mark_forbidden(&page.id);

        let err = client.update_page(&page.id, "Guide", "b").await.unwrap_err();
        assert!(err.is_forbidden());
        assert_eq!(client.content(&page.id).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_children_and_counters() {
        let client = InMemoryPageClient::new();
        let parent = client.create_page("DOC", "Docs", "").await.unwrap();
        create_page_under(&client, "DOC", "Guide", "", Some(&parent.id))
            .await
            .unwrap();

        let children = client.get_child_pages(&parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].title, "Guide");
        assert_eq!(client.calls().creates, 2);
        assert_eq!(client.calls().child_listings, 1);
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let client = InMemoryPageClient::new();
        let page = client.create_page("DOC", "Guide", "a").await.unwrap();
        let updated = client.update_page(&page.id, "Guide v2", "b").await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "Guide v2");
    }
}
