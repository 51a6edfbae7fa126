//! Directory Page Synchronizer: one stub page per local directory.

use chrono::Utc;
use tracing::{debug, info};

use crate::classify::SyncStatus;
use crate::convert::{escape, humanize};
use crate::error::Result;
use crate::metadata::{DirectoryRecord, SyncMetadata};
use crate::outcome::{PageAction, SyncedPage};
use crate::remote::{Page, PageClient, create_page_under};

/// Display title from the last path segment: `docs/user-guides` -> `User Guides`.
pub fn directory_title(dir: &str) -> String {
    let name = dir.rsplit('/').next().unwrap_or(dir);
    humanize(name)
}

/// Placeholder body listing the documents beneath a directory.
///
/// Always regenerated in full, so updating the stub is idempotent.
pub fn stub_body(title: &str, dir: &str, descendant_files: &[String]) -> String {
    let mut body = format!(
        "<h1>{}</h1><p>This page collects the documents under <code>{}/</code>.</p>",
        escape(title),
        escape(dir)
    );
    if !descendant_files.is_empty() {
        body.push_str("<h2>Documents in this section</h2><ul>");
        for file in descendant_files {
            body.push_str(&format!("<li>{}</li>", escape(file)));
        }
        body.push_str("</ul>");
    }
    body.push_str("<ac:structured-macro ac:name=\"children\" />");
    body
}

/// One directory to synchronize.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryRequest<'a> {
    pub path: &'a str,
    /// Remote page of the parent directory (or configured root page)
    pub parent_id: Option<&'a str>,
    pub status: SyncStatus,
    /// Aggregate digest of the directory's descendants
    pub digest: &'a str,
    pub descendant_files: &'a [String],
}

pub struct DirectorySync<'a, C: PageClient + ?Sized> {
    client: &'a C,
    space_key: &'a str,
}

impl<'a, C: PageClient + ?Sized> DirectorySync<'a, C> {
    pub fn new(client: &'a C, space_key: &'a str) -> Self {
        Self { client, space_key }
    }

    /// Create or update the stub page for a directory and refresh its record.
    pub async fn ensure_directory_page(
        &self,
        request: DirectoryRequest<'_>,
        metadata: &mut SyncMetadata,
    ) -> Result<SyncedPage> {
        if request.status == SyncStatus::UpToDate {
            if let Some(page) = self.resolve_cached(request.path, metadata).await {
                debug!("Directory {} is up to date (page {})", request.path, page.id);
                self.refresh_record(&request, &page, metadata);
                return Ok(SyncedPage::new(page, PageAction::Unchanged));
            }
        }

        let title = directory_title(request.path);
        let body = stub_body(&title, request.path, request.descendant_files);

        let synced = match self
            .client
            .find_page_by_title(self.space_key, &title)
            .await?
        {
            Some(existing) => {
                let page = self.client.update_page(&existing.id, &title, &body).await?;
                info!("Updated directory page '{}' ({})", title, page.id);
                SyncedPage::new(page, PageAction::Updated)
            }
            None => {
                let page = create_page_under(
                    self.client,
                    self.space_key,
                    &title,
                    &body,
                    request.parent_id,
                )
                .await?;
                info!("Created directory page '{}' ({})", title, page.id);
                SyncedPage::new(page, PageAction::Created)
            }
        };

        self.refresh_record(&request, &synced.page, metadata);
        Ok(synced)
    }

    /// Resolve the cached page by identifier, then by title.
    async fn resolve_cached(&self, path: &str, metadata: &SyncMetadata) -> Option<Page> {
        let record = metadata.directory(path)?;

        if let Some(page_id) = &record.page_id {
            match self.client.get_page(page_id).await {
                Ok(page) => return Some(page),
                Err(e) => debug!("Cached page {} for {} not resolvable: {}", page_id, path, e),
            }
        }

        match self
            .client
            .find_page_by_title(self.space_key, &record.title)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!("Title lookup for {} failed: {}", path, e);
                None
            }
        }
    }

    fn refresh_record(&self, request: &DirectoryRequest<'_>, page: &Page, metadata: &mut SyncMetadata) {
        metadata.upsert_directory(
            request.path,
            DirectoryRecord {
                hash: request.digest.to_string(),
                last_sync: Utc::now(),
                page_id: Some(page.id.clone()),
                title: page.title.clone(),
            },
        );
    }
}
