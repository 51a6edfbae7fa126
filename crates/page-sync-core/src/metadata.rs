//! Persisted record of the last known sync state.
//!
//! Stored as `.page-sync/metadata.json` inside the sync root. The file is
//! loaded once per run (absence is not an error), mutated in memory, and
//! written back atomically by the orchestrator at the end of the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::fs::{FileSystem, FsError};

/// Hidden directory for sync state
pub const METADATA_DIR: &str = ".page-sync";
/// Metadata document
pub const METADATA_FILE: &str = ".page-sync/metadata.json";
const METADATA_TMP_FILE: &str = ".page-sync/metadata.json.tmp";

/// Schema version written by this build.
pub const METADATA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Corrupt sync metadata in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Unsupported sync metadata version {found} (expected at most {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Failed to serialize sync metadata: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Last known state of one tracked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// SHA-256 of the file content at last sync
    pub hash: String,
    pub last_sync: DateTime<Utc>,
    /// Remote page identifier. Authoritative once set, until recovery clears it.
    #[serde(default)]
    pub page_id: Option<String>,
    /// Title derived from the local source at last sync
    pub title: String,
    /// Remote title when it intentionally differs from `title`: a recovery
    /// suffix or an adopted remote rename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_title: Option<String>,
    pub mod_time: DateTime<Utc>,
    pub size: u64,
    /// Attachment file name -> digest of what was uploaded
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, String>,
}

impl FileRecord {
    /// Title the remote page is expected to carry.
    pub fn published_title(&self) -> &str {
        self.remote_title.as_deref().unwrap_or(&self.title)
    }
}

/// Last known state of one tracked directory (stub page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Aggregate digest over every descendant file
    pub hash: String,
    pub last_sync: DateTime<Utc>,
    #[serde(default)]
    pub page_id: Option<String>,
    pub title: String,
}

/// Root persisted object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    #[serde(default)]
    pub directories: BTreeMap<String, DirectoryRecord>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    pub space_key: String,
    pub version: u32,
}

impl SyncMetadata {
    pub fn new(space_key: impl Into<String>) -> Self {
        Self {
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            last_sync: None,
            space_key: space_key.into(),
            version: METADATA_VERSION,
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(&normalize_path(path))
    }

    pub fn directory(&self, path: &str) -> Option<&DirectoryRecord> {
        self.directories.get(&normalize_path(path))
    }

    pub fn upsert_file(&mut self, path: &str, record: FileRecord) {
        self.files.insert(normalize_path(path), record);
    }

    pub fn upsert_directory(&mut self, path: &str, record: DirectoryRecord) {
        self.directories.insert(normalize_path(path), record);
    }

    /// Accept a title given to a file's page on the remote side.
    pub fn adopt_remote_title(&mut self, path: &str, remote_title: &str) {
        if let Some(record) = self.files.get_mut(&normalize_path(path)) {
            record.remote_title = (record.title != remote_title).then(|| remote_title.to_string());
        }
    }

    /// Forget the remote identifier of a file, keeping the rest of its record.
    ///
    /// Returns the identifier that was cleared, if any.
    pub fn clear_file_page_id(&mut self, path: &str) -> Option<String> {
        self.files
            .get_mut(&normalize_path(path))
            .and_then(|record| record.page_id.take())
    }

    /// Re-key every record through `normalize_path`.
    fn renormalize(&mut self) {
        let files = std::mem::take(&mut self.files);
        self.files = files
            .into_iter()
            .map(|(path, record)| (normalize_path(&path), record))
            .collect();
        let directories = std::mem::take(&mut self.directories);
        self.directories = directories
            .into_iter()
            .map(|(path, record)| (normalize_path(&path), record))
            .collect();
    }
}

/// Normalize a path relative to the sync root.
///
/// Backslashes become `/`, and empty and `.` segments are dropped, so
/// `./docs//guide.md`, `docs\guide.md` and `/docs/guide.md/` all map to
/// `docs/guide.md`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Loads and saves `SyncMetadata` through a `FileSystem`.
pub struct MetadataStore<'a, F: FileSystem + ?Sized> {
    fs: &'a F,
}

impl<'a, F: FileSystem + ?Sized> MetadataStore<'a, F> {
    pub fn new(fs: &'a F) -> Self {
        Self { fs }
    }

    /// Load persisted metadata. `Ok(None)` if nothing was persisted yet.
    pub async fn load(&self) -> Result<Option<SyncMetadata>> {
        if !self.fs.exists(METADATA_FILE).await? {
            debug!("No sync metadata at {}", METADATA_FILE);
            return Ok(None);
        }

        let bytes = self.fs.read(METADATA_FILE).await?;
        let mut metadata: SyncMetadata =
            serde_json::from_slice(&bytes).map_err(|e| MetadataError::Corrupt {
                path: METADATA_FILE.to_string(),
                reason: e.to_string(),
            })?;

        if metadata.version > METADATA_VERSION {
            return Err(MetadataError::UnsupportedVersion {
                found: metadata.version,
                supported: METADATA_VERSION,
            });
        }

        metadata.renormalize();
        metadata.version = METADATA_VERSION;
        debug!(
            "Loaded sync metadata: {} file(s), {} directory(ies)",
            metadata.files.len(),
            metadata.directories.len()
        );
        Ok(Some(metadata))
    }

    /// Persist metadata, replacing the previous document atomically.
    pub async fn save(&self, metadata: &SyncMetadata) -> Result<()> {
        let contents = serde_json::to_vec_pretty(metadata)
            .map_err(|e| MetadataError::Serialize(e.to_string()))?;

        self.fs.mkdir(METADATA_DIR).await?;
        self.fs.write(METADATA_TMP_FILE, &contents).await?;
        self.fs.rename(METADATA_TMP_FILE, METADATA_FILE).await?;
        debug!("Saved sync metadata to {}", METADATA_FILE);
        Ok(())
    }

    /// Remove the persisted cache. Missing cache is not an error.
    pub async fn clear(&self) -> Result<bool> {
        if !self.fs.exists(METADATA_FILE).await? {
            return Ok(false);
        }
        self.fs.delete(METADATA_FILE).await?;
        info!("Cleared sync metadata cache");
        Ok(true)
    }
}
