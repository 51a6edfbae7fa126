//! page-sync-core: Sync engine mirroring a local markdown tree to remote pages.
//!
//! This crate provides:
//! - Change classification against a persisted metadata cache
//! - Hierarchy reconstruction and dependency-ordered replay
//! - Recovery from pages that can no longer be modified
//! - Divergence (rename/orphan) detection
//! - FileSystem, PageClient, ContentConverter and DiagramRenderer abstractions
//!   with in-memory implementations for testing

pub mod classify;
pub mod convert;
pub mod diagram;
pub mod directory_sync;
pub mod divergence;
pub mod error;
pub mod file_sync;
pub mod fs;
pub mod hashing;
pub mod hierarchy;
pub mod markdown;
pub mod metadata;
pub mod orchestrator;
pub mod outcome;
pub mod recovery;
pub mod remote;
pub mod scan;

pub use classify::SyncStatus;
pub use convert::{ContentConverter, MarkdownConverter, ParsedDocument};
pub use diagram::{DiagramError, DiagramRenderer};
pub use divergence::{DivergenceKind, EntityKind, RenameDetection, Severity};
pub use error::SyncError;
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use hierarchy::PageSyncInfo;
pub use metadata::{MetadataStore, SyncMetadata};
pub use orchestrator::{Orchestrator, SyncOptions, SyncPlan, SyncSettings, SyncSummary};
pub use outcome::PageAction;
pub use remote::{Attachment, InMemoryPageClient, Page, PageClient, RemoteError};
