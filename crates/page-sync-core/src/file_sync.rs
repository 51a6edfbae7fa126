//! File Page Synchronizer: one remote page per document.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::classify::SyncStatus;
use crate::convert::{ContentConverter, ParsedDocument};
use crate::diagram::{DiagramAttachment, DiagramRenderer, extract_diagrams};
use crate::error::{Result, SyncError};
use crate::hashing::Fingerprint;
use crate::hierarchy::parent_path;
use crate::metadata::{FileRecord, SyncMetadata};
use crate::outcome::{PageAction, SyncedPage};
use crate::recovery::{Recovery, RecoveryRequest};
use crate::remote::{Page, PageClient, RemoteError, create_page_under};

/// Remote parent for a document.
///
/// Documents directly under the sync root go beneath `root_parent`. Any
/// other document's directory must already be in `dir_index`; a miss means
/// directories were not synced first.
pub fn resolve_parent(
    path: &str,
    dir_index: &BTreeMap<String, String>,
    root_parent: Option<&str>,
) -> Result<Option<String>> {
    match parent_path(path) {
        None => Ok(root_parent.map(String::from)),
        Some(dir) => dir_index
            .get(dir)
            .cloned()
            .map(Some)
            .ok_or_else(|| SyncError::ParentNotSynced {
                path: path.to_string(),
                parent: dir.to_string(),
            }),
    }
}

/// Title to send when updating the cached page of a document.
///
/// While the local title is unchanged since the last sync, the page keeps the
/// remote title it was given there (a replacement suffix or a rename made on
/// the remote side). A local rename is always published.
pub fn publish_title<'a>(record: &'a FileRecord, local_title: &'a str) -> &'a str {
    if record.title == local_title {
        record.published_title()
    } else {
        local_title
    }
}

/// One document to synchronize.
#[derive(Debug, Clone, Copy)]
pub struct FileRequest<'a> {
    pub path: &'a str,
    pub document: &'a ParsedDocument,
    pub fingerprint: &'a Fingerprint,
    pub status: SyncStatus,
    pub parent_id: Option<&'a str>,
}

pub struct FileSync<'a, C: PageClient + ?Sized> {
    client: &'a C,
    space_key: &'a str,
    converter: &'a dyn ContentConverter,
    renderer: Option<&'a dyn DiagramRenderer>,
    diagrams_enabled: bool,
}

impl<'a, C: PageClient + ?Sized> FileSync<'a, C> {
    pub fn new(client: &'a C, space_key: &'a str, converter: &'a dyn ContentConverter) -> Self {
        Self {
            client,
            space_key,
            converter,
            renderer: None,
            diagrams_enabled: false,
        }
    }

    /// Enable the diagram pass with the given renderer.
    pub fn with_diagrams(mut self, renderer: Option<&'a dyn DiagramRenderer>) -> Self {
        self.diagrams_enabled = true;
        self.renderer = renderer;
        self
    }

    /// Create or update the page for one document and upsert its record.
    pub async fn sync_file(
        &self,
        request: FileRequest<'_>,
        metadata: &mut SyncMetadata,
    ) -> Result<SyncedPage> {
        let title = request.document.title.as_str();
        let markup = self.converter.to_markup(&request.document.raw)?;

        let mut synced = match self.write_page(&request, &markup, metadata).await {
            Ok(synced) => synced,
            Err(RemoteError::Forbidden { page_id, .. }) => {
                debug!("Page {} for {} is forbidden, recovering", page_id, request.path);
                let page = Recovery::new(self.client, self.space_key)
                    .recover(
                        RecoveryRequest {
                            path: request.path,
                            title,
                            content: &markup,
                            parent_id: request.parent_id,
                        },
                        metadata,
                    )
                    .await?;
                SyncedPage::new(page, PageAction::Recreated)
            }
            Err(e) => return Err(e.into()),
        };

        let attachments = if self.diagrams_enabled {
            self.attach_diagrams(&request, &mut synced, metadata).await?
        } else {
            BTreeMap::new()
        };

        metadata.upsert_file(
            request.path,
            FileRecord {
                hash: request.fingerprint.digest.clone(),
                last_sync: Utc::now(),
                page_id: Some(synced.page.id.clone()),
                title: title.to_string(),
                remote_title: (synced.page.title != title).then(|| synced.page.title.clone()),
                mod_time: request.fingerprint.mod_time,
                size: request.fingerprint.size,
                attachments,
            },
        );
        Ok(synced)
    }

    /// Update the cached page, else the page owning the title, else create.
    async fn write_page(
        &self,
        request: &FileRequest<'_>,
        markup: &str,
        metadata: &SyncMetadata,
    ) -> std::result::Result<SyncedPage, RemoteError> {
        let title = request.document.title.as_str();

        let cached = metadata
            .file(request.path)
            .filter(|_| request.status != SyncStatus::New)
            .and_then(|record| Some((record.page_id.clone()?, publish_title(record, title))));
        if let Some((page_id, publish)) = cached {
            match self.client.update_page(&page_id, publish, markup).await {
                Ok(page) => {
                    info!("Updated page '{}' ({}) from {}", publish, page.id, request.path);
                    return Ok(SyncedPage::new(page, PageAction::Updated));
                }
                Err(RemoteError::NotFound(_)) => {
                    debug!("Cached page {} for {} is gone, looking up by title", page_id, request.path);
                }
                Err(e) => return Err(e),
            }
        }

        match self.client.find_page_by_title(self.space_key, title).await? {
            Some(existing) => {
                let page = self.client.update_page(&existing.id, title, markup).await?;
                info!("Updated page '{}' ({}) from {}", title, page.id, request.path);
                Ok(SyncedPage::new(page, PageAction::Updated))
            }
            None => {
                let page =
                    create_page_under(self.client, self.space_key, title, markup, request.parent_id)
                        .await?;
                info!("Created page '{}' ({}) from {}", title, page.id, request.path);
                Ok(SyncedPage::new(page, PageAction::Created))
            }
        }
    }

    /// Render, upload and embed the document's diagrams.
    ///
    /// Runs after the page exists, since attachments need its identifier.
    /// Returns the attachment digest map for the record.
    async fn attach_diagrams(
        &self,
        request: &FileRequest<'_>,
        synced: &mut SyncedPage,
        metadata: &SyncMetadata,
    ) -> Result<BTreeMap<String, String>> {
        let blocks = extract_diagrams(&request.document.raw);
        if blocks.is_empty() {
            return Ok(BTreeMap::new());
        }
        let renderer = self.renderer.ok_or(SyncError::RendererMissing)?;

        // A replacement page starts without attachments
        let previous = match synced.action {
            PageAction::Recreated => None,
            _ => metadata.file(request.path).map(|record| &record.attachments),
        };

        let page_id = synced.page.id.clone();
        let mut attachments = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let file_name = block.attachment_name();
            let unchanged = previous
                .and_then(|prev| prev.get(&file_name))
                .is_some_and(|digest| *digest == block.digest);

            if unchanged {
                debug!("Diagram {} on page {} is unchanged", file_name, page_id);
            } else {
                let rendered = renderer.render(&block.source, &file_name).await?;
                self.client.upload_attachment(&page_id, &rendered).await?;
                debug!("Uploaded diagram {} to page {}", file_name, page_id);
            }

            attachments.push(DiagramAttachment {
                file_name,
                digest: block.digest.clone(),
            });
        }

        let markup =
            self.converter
                .to_markup_for_page(&request.document.raw, &page_id, &attachments)?;
        let page: Page = self
            .client
            .update_page(&page_id, &synced.page.title, &markup)
            .await
            .inspect_err(|e| warn!("Diagram update of page {} failed: {}", page_id, e))?;
        synced.page = page;

        Ok(attachments
            .into_iter()
            .map(|a| (a.file_name, a.digest))
            .collect())
    }
}
