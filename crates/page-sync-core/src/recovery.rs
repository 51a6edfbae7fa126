//! Recovery Controller for pages that exist but can no longer be modified.
//!
//! ```text
//! ClearCachedId -> CreateReplacement --(title taken)--> CreateWithSuffix
//!                        |                                    |
//!                        +--------------> Done <--------------+
//!                                          Failed <-(title taken again)
//! ```
//!
//! The cached identifier is discarded before anything else, so a later run
//! never retries the dead page even if this recovery fails.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::metadata::SyncMetadata;
use crate::remote::{Page, PageClient, RemoteError, create_page_under};

/// Human-readable suffix format for replacement titles
const REPLACEMENT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Title for a replacement page when the original title is still owned by
/// the unmodifiable page.
pub fn replacement_title(title: &str, at: DateTime<Utc>) -> String {
    format!("{} (replaced {})", title, at.format(REPLACEMENT_FORMAT))
}

#[derive(Debug)]
pub enum RecoveryState {
    ClearCachedId,
    CreateReplacement,
    CreateWithSuffix { title: String },
    Done(Page),
    Failed(SyncError),
}

/// What to recreate.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryRequest<'a> {
    pub path: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub parent_id: Option<&'a str>,
}

pub struct Recovery<'a, C: PageClient + ?Sized> {
    client: &'a C,
    space_key: &'a str,
}

impl<'a, C: PageClient + ?Sized> Recovery<'a, C> {
    pub fn new(client: &'a C, space_key: &'a str) -> Self {
        Self { client, space_key }
    }

    /// Recreate the page for `request.path` as a new page.
    ///
    /// Attempts at most two creates: the original title, then the
    /// timestamp-suffixed title.
    pub async fn recover(
        &self,
        request: RecoveryRequest<'_>,
        metadata: &mut SyncMetadata,
    ) -> Result<Page> {
        let mut state = RecoveryState::ClearCachedId;
        loop {
            state = match state {
                RecoveryState::ClearCachedId => {
                    if let Some(old) = metadata.clear_file_page_id(request.path) {
                        warn!(
                            "Page {} for {} cannot be modified, discarding cached id",
                            old, request.path
                        );
                    }
                    RecoveryState::CreateReplacement
                }
                RecoveryState::CreateReplacement => match self.create(&request, request.title).await {
                    Ok(page) => RecoveryState::Done(page),
                    Err(e) if e.is_title_conflict() => RecoveryState::CreateWithSuffix {
                        title: replacement_title(request.title, Utc::now()),
                    },
                    Err(e) => RecoveryState::Failed(e.into()),
                },
                RecoveryState::CreateWithSuffix { title } => match self.create(&request, &title).await {
                    Ok(page) => RecoveryState::Done(page),
                    Err(e) if e.is_title_conflict() => {
                        RecoveryState::Failed(SyncError::RecoveryExhausted {
                            path: request.path.to_string(),
                            title: request.title.to_string(),
                            suffixed_title: title,
                        })
                    }
                    Err(e) => RecoveryState::Failed(e.into()),
                },
                RecoveryState::Done(page) => {
                    info!(
                        "Recreated {} as page '{}' ({})",
                        request.path, page.title, page.id
                    );
                    return Ok(page);
                }
                RecoveryState::Failed(e) => return Err(e),
            };
        }
    }

    async fn create(&self, request: &RecoveryRequest<'_>, title: &str) -> std::result::Result<Page, RemoteError> {
        create_page_under(
            self.client,
            self.space_key,
            title,
            request.content,
            request.parent_id,
        )
        .await
    }
}
