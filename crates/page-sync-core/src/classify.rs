//! Change classification of local entries against cached state.

use tracing::{debug, warn};

use crate::hashing::Fingerprint;
use crate::metadata::{DirectoryRecord, FileRecord};
use crate::remote::{PageClient, RemoteError};

/// Sync status of one document or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    New,
    Changed,
    UpToDate,
}

impl SyncStatus {
    pub fn needs_sync(self) -> bool {
        self != SyncStatus::UpToDate
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::New => "new",
            SyncStatus::Changed => "changed",
            SyncStatus::UpToDate => "up-to-date",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a document from its cached record alone.
///
/// The modification time is a secondary signal: a newer mtime marks the file
/// Changed even when the digest matches.
pub fn classify_file(record: Option<&FileRecord>, fingerprint: &Fingerprint) -> SyncStatus {
    match record {
        None => SyncStatus::New,
        Some(record) if record.hash != fingerprint.digest => SyncStatus::Changed,
        Some(record) if record.mod_time < fingerprint.mod_time => SyncStatus::Changed,
        Some(_) => SyncStatus::UpToDate,
    }
}

/// Classify a directory from its aggregate digest and its descendants.
pub fn classify_directory(
    record: Option<&DirectoryRecord>,
    digest: &str,
    any_descendant_needs_sync: bool,
) -> SyncStatus {
    match record {
        None => SyncStatus::New,
        Some(record) if record.hash != digest => SyncStatus::Changed,
        Some(_) if any_descendant_needs_sync => SyncStatus::Changed,
        Some(_) => SyncStatus::UpToDate,
    }
}

/// Live check for entries the cache believes are up to date.
///
/// A cached page identifier is resolved directly, so a page renamed on the
/// remote side stays up to date; without one the title is looked up. A page
/// that no longer exists was deleted remotely and the entry is New again. A
/// failed lookup degrades to Changed so the entry is synced conservatively
/// instead of aborting the run.
pub async fn confirm_remote<C: PageClient + ?Sized>(
    client: &C,
    space: &str,
    status: SyncStatus,
    title: &str,
    page_id: Option<&str>,
) -> SyncStatus {
    if status != SyncStatus::UpToDate {
        return status;
    }

    let exists = match page_id {
        Some(id) => match client.get_page(id).await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        },
        None => client
            .find_page_by_title(space, title)
            .await
            .map(|page| page.is_some()),
    };

    match exists {
        Ok(true) => SyncStatus::UpToDate,
        Ok(false) => {
            debug!("Page '{}' no longer exists remotely, marking as new", title);
            SyncStatus::New
        }
        Err(e) => {
            warn!("Lookup of '{}' failed ({}), treating as changed", title, e);
            SyncStatus::Changed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryPageClient;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(millis).unwrap()
    }

    fn fingerprint(digest: &str, mod_time: i64) -> Fingerprint {
        Fingerprint {
            digest: digest.to_string(),
            size: 10,
            mod_time: at(mod_time),
        }
    }

    fn file_record(hash: &str, mod_time: i64) -> FileRecord {
        FileRecord {
            hash: hash.to_string(),
            last_sync: at(mod_time),
            page_id: Some("1".to_string()),
            title: "Guide".to_string(),
            remote_title: None,
            mod_time: at(mod_time),
            size: 10,
            attachments: BTreeMap::new(),
        }
    }

    fn dir_record(hash: &str) -> DirectoryRecord {
        DirectoryRecord {
            hash: hash.to_string(),
            last_sync: at(0),
            page_id: Some("2".to_string()),
            title: "Docs".to_string(),
        }
    }

    #[test]
    fn test_no_record_is_new() {
        assert_eq!(classify_file(None, &fingerprint("a", 1)), SyncStatus::New);
    }

    #[test]
    fn test_same_digest_and_mtime_is_up_to_date() {
        let record = file_record("a", 100);
        assert_eq!(
            classify_file(Some(&record), &fingerprint("a", 100)),
            SyncStatus::UpToDate
        );
    }

    #[test]
    fn test_digest_mismatch_is_changed() {
        let record = file_record("a", 100);
        assert_eq!(
            classify_file(Some(&record), &fingerprint("b", 100)),
            SyncStatus::Changed
        );
    }

    #[test]
    fn test_newer_mtime_is_changed() {
        let record = file_record("a", 100);
        assert_eq!(
            classify_file(Some(&record), &fingerprint("a", 200)),
            SyncStatus::Changed
        );
        // Older mtime (e.g. restored from backup) does not count
        assert_eq!(
            classify_file(Some(&record), &fingerprint("a", 50)),
            SyncStatus::UpToDate
        );
    }

    #[test]
    fn test_directory_classification() {
        assert_eq!(classify_directory(None, "d", false), SyncStatus::New);
        let record = dir_record("d");
        assert_eq!(classify_directory(Some(&record), "x", false), SyncStatus::Changed);
        assert_eq!(classify_directory(Some(&record), "d", true), SyncStatus::Changed);
        assert_eq!(classify_directory(Some(&record), "d", false), SyncStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_confirm_remote_downgrades_missing_page() {
        let client = InMemoryPageClient::new();
        let status = confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Gone", None).await;
        assert_eq!(status, SyncStatus::New);
    }

    #[tokio::test]
    async fn test_confirm_remote_keeps_existing_page() {
        let client = InMemoryPageClient::new();
        client.seed_page("DOC", "Guide", None);
        let status = confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Guide", None).await;
        assert_eq!(status, SyncStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_confirm_remote_follows_renamed_page_by_id() {
        let client = InMemoryPageClient::new();
        let page = client.seed_page("DOC", "Guide", None);
        client.rename_page(&page.id, "User Guide");

        let status =
            confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Guide", Some(&page.id)).await;
        assert_eq!(status, SyncStatus::UpToDate);
        assert_eq!(client.calls().lookups, 0);

        client.delete_page(&page.id);
        let status =
            confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Guide", Some(&page.id)).await;
        assert_eq!(status, SyncStatus::New);
    }

    #[tokio::test]
    async fn test_confirm_remote_lookup_error_needs_sync() {
        let client = InMemoryPageClient::new();
        client.fail_lookups(true);
        let status = confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Guide", None).await;
        assert_eq!(status, SyncStatus::Changed);
        let status = confirm_remote(&client, "DOC", SyncStatus::UpToDate, "Guide", Some("1")).await;
        assert_eq!(status, SyncStatus::Changed);
    }

    #[tokio::test]
    async fn test_confirm_remote_skips_entries_needing_sync() {
        let client = InMemoryPageClient::new();
        let status = confirm_remote(&client, "DOC", SyncStatus::Changed, "Guide", Some("1")).await;
        assert_eq!(status, SyncStatus::Changed);
        assert_eq!(client.calls().lookups, 0);
        assert_eq!(client.calls().gets, 0);
    }
}
