//! Sync Orchestrator: plan, confirm, replay, persist.
//!
//! One sequential control flow per run. The orchestrator owns the in-memory
//! `SyncMetadata` for the duration of the run and is the only writer of its
//! persisted form, which happens once at the end.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::classify::{SyncStatus, classify_directory, classify_file, confirm_remote};
use crate::convert::{ContentConverter, ParsedDocument};
use crate::diagram::{DiagramRenderer, has_diagrams};
use crate::directory_sync::{DirectoryRequest, DirectorySync, directory_title};
use crate::divergence::{DivergenceDetector, DivergenceKind, EntityKind, RenameDetection};
use crate::error::{Result, SyncError};
use crate::file_sync::{FileRequest, FileSync, resolve_parent};
use crate::fs::FileSystem;
use crate::hashing::{Fingerprint, aggregate_digest};
use crate::hierarchy::{HierarchyEntry, PageSyncInfo, build_tree, extract_directories};
use crate::metadata::{MetadataStore, SyncMetadata};
use crate::outcome::PageAction;
use crate::remote::PageClient;
use crate::scan::scan;

/// Per-invocation flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Plan and preview only; no remote writes, nothing persisted
    pub dry_run: bool,
    /// Skip the confirmation prompt
    pub force: bool,
    /// Ignore the persisted metadata and classify from scratch
    pub no_cache: bool,
}

/// Fixed wiring for an orchestrator.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub space_key: String,
    /// Page that top-level pages are created beneath
    pub root_parent_id: Option<String>,
    pub diagrams_enabled: bool,
}

impl SyncSettings {
    pub fn new(space_key: impl Into<String>) -> Self {
        Self {
            space_key: space_key.into(),
            root_parent_id: None,
            diagrams_enabled: false,
        }
    }
}

/// A classified document.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub path: String,
    pub document: ParsedDocument,
    pub fingerprint: Fingerprint,
    pub status: SyncStatus,
}

/// A classified directory.
#[derive(Debug, Clone)]
pub struct PlannedDirectory {
    pub path: String,
    pub title: String,
    pub digest: String,
    pub status: SyncStatus,
    pub descendant_files: Vec<String>,
}

/// An entry that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub path: String,
    pub message: String,
}

impl EntryFailure {
    fn new(path: impl Into<String>, message: impl ToString) -> Self {
        Self {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Everything a run would do, computed without remote writes.
#[derive(Debug)]
pub struct SyncPlan {
    pub metadata: SyncMetadata,
    /// Sorted by path
    pub files: Vec<PlannedFile>,
    /// Sorted by depth, then path
    pub directories: Vec<PlannedDirectory>,
    pub tree: Vec<PageSyncInfo>,
    pub divergences: Vec<RenameDetection>,
    /// Entries that failed to read or parse
    pub failures: Vec<EntryFailure>,
}

impl SyncPlan {
    /// Number of files and directories with `status`.
    pub fn count(&self, status: SyncStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
            + self.directories.iter().filter(|d| d.status == status).count()
    }

    pub fn needs_sync(&self) -> bool {
        self.files.iter().any(|f| f.status.needs_sync())
            || self.directories.iter().any(|d| d.status.needs_sync())
    }

    fn pending_diagrams(&self) -> bool {
        self.files
            .iter()
            .any(|f| f.status.needs_sync() && has_diagrams(&f.document.raw))
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub recreated: usize,
    pub unchanged: usize,
    /// Up-to-date files that were not touched
    pub skipped: usize,
    pub errors: usize,
    pub failures: Vec<EntryFailure>,
    pub divergences: Vec<RenameDetection>,
    /// The confirmation prompt was declined
    pub cancelled: bool,
    pub dry_run: bool,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    /// Number of pages written by the run.
    pub fn written(&self) -> usize {
        self.created + self.updated + self.recreated
    }

    fn record(&mut self, action: PageAction) {
        match action {
            PageAction::Created => self.created += 1,
            PageAction::Updated => self.updated += 1,
            PageAction::Recreated => self.recreated += 1,
            PageAction::Unchanged => self.unchanged += 1,
        }
    }

    fn fail(&mut self, failure: EntryFailure) {
        self.errors += 1;
        self.failures.push(failure);
    }
}

pub struct Orchestrator<F: FileSystem, C: PageClient> {
    fs: F,
    client: C,
    converter: Box<dyn ContentConverter>,
    renderer: Option<Box<dyn DiagramRenderer>>,
    settings: SyncSettings,
    span: Span,
}

impl<F: FileSystem, C: PageClient> Orchestrator<F, C> {
    pub fn new(fs: F, client: C, converter: Box<dyn ContentConverter>, settings: SyncSettings) -> Self {
        let span = info_span!("sync", space = %settings.space_key);
        Self {
            fs,
            client,
            converter,
            renderer: None,
            settings,
            span,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn DiagramRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Log every run inside `span` instead of the default `sync` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Classify every local entry and detect divergence. Never writes.
    pub async fn plan(&self, options: &SyncOptions) -> Result<SyncPlan> {
        self.build_plan(options).instrument(self.span.clone()).await
    }

    /// Plan, confirm, and replay the plan against the remote service.
    ///
    /// `confirm` is consulted between preview and writes unless
    /// `options.force` is set; returning `false` cancels the run.
    pub async fn run<P>(&self, options: &SyncOptions, confirm: P) -> Result<SyncSummary>
    where
        P: FnOnce(&SyncPlan) -> bool,
    {
        self.execute(options, confirm)
            .instrument(self.span.clone())
            .await
    }

    /// Delete the persisted metadata. Returns whether there was any.
    pub async fn clear_cache(&self) -> Result<bool> {
        Ok(MetadataStore::new(&self.fs).clear().await?)
    }

    async fn load_metadata(&self, options: &SyncOptions) -> Result<SyncMetadata> {
        let space = &self.settings.space_key;
        if options.no_cache {
            info!("Ignoring cached sync metadata");
            return Ok(SyncMetadata::new(space.as_str()));
        }

        match MetadataStore::new(&self.fs).load().await? {
            Some(metadata) if metadata.space_key == *space => Ok(metadata),
            Some(metadata) => {
                warn!(
                    "Cached metadata belongs to space {}, not {}; starting fresh",
                    metadata.space_key, space
                );
                Ok(SyncMetadata::new(space.as_str()))
            }
            None => Ok(SyncMetadata::new(space.as_str())),
        }
    }

    async fn build_plan(&self, options: &SyncOptions) -> Result<SyncPlan> {
        let space = self.settings.space_key.as_str();
        let mut metadata = self.load_metadata(options).await?;

        let scanned = scan(&self.fs).await?;
        let mut failures: Vec<EntryFailure> = scanned
            .failures
            .into_iter()
            .map(|f| EntryFailure::new(f.path, f.reason))
            .collect();

        let mut files = Vec::with_capacity(scanned.files.len());
        for local in scanned.files {
            let document = match self.converter.parse(&local.path, &local.content) {
                Ok(document) => document,
                Err(e) => {
                    error!("Failed to parse {}: {}", local.path, e);
                    failures.push(EntryFailure::new(local.path, e));
                    continue;
                }
            };
            let record = metadata.file(&local.path);
            let status = classify_file(record, &local.fingerprint);
            let cached_id = record.and_then(|r| r.page_id.as_deref());
            let status =
                confirm_remote(&self.client, space, status, &document.title, cached_id).await;
            debug!("{}: {}", local.path, status);
            files.push(PlannedFile {
                path: local.path,
                document,
                fingerprint: local.fingerprint,
                status,
            });
        }

        let directories = self.plan_directories(&files, &metadata).await;

        let entries: Vec<HierarchyEntry> = directories
            .iter()
            .map(|d| HierarchyEntry {
                path: d.path.clone(),
                title: d.title.clone(),
                status: d.status,
                is_directory: true,
            })
            .chain(files.iter().map(|f| HierarchyEntry {
                path: f.path.clone(),
                title: f.document.title.clone(),
                status: f.status,
                is_directory: false,
            }))
            .collect();

        let skipped: Vec<String> = failures.iter().map(|f| f.path.clone()).collect();
        let divergences = DivergenceDetector::new(&self.client)
            .detect(&entries, &metadata, &skipped)
            .await;
        // Later updates keep the title the page was renamed to
        for detection in &divergences {
            if let (EntityKind::File, DivergenceKind::RemoteRename, Some(remote_title)) =
                (detection.entity, detection.kind, &detection.actual_title)
            {
                metadata.adopt_remote_title(&detection.local_path, remote_title);
            }
        }
        let tree = build_tree(entries);

        let plan = SyncPlan {
            metadata,
            files,
            directories,
            tree,
            divergences,
            failures,
        };
        info!(
            "Planned: {} new, {} changed, {} up to date, {} failed",
            plan.count(SyncStatus::New),
            plan.count(SyncStatus::Changed),
            plan.count(SyncStatus::UpToDate),
            plan.failures.len()
        );
        Ok(plan)
    }

    /// Classify every directory that has at least one document beneath it.
    ///
    /// Deepest directories are classified first so a changed subdirectory
    /// marks its ancestors changed too.
    async fn plan_directories(
        &self,
        files: &[PlannedFile],
        metadata: &SyncMetadata,
    ) -> Vec<PlannedDirectory> {
        let space = self.settings.space_key.as_str();
        let paths = extract_directories(files.iter().map(|f| f.path.as_str()));
        let mut statuses: BTreeMap<String, SyncStatus> = BTreeMap::new();
        let mut planned = Vec::with_capacity(paths.len());

        for dir in paths.iter().rev() {
            let prefix = format!("{}/", dir);
            let digest = aggregate_digest(
                dir,
                files
                    .iter()
                    .map(|f| (f.path.as_str(), f.fingerprint.digest.as_str())),
            );
            let descendant_files: Vec<String> = files
                .iter()
                .filter(|f| f.path.starts_with(&prefix))
                .map(|f| f.path.clone())
                .collect();

            let any_descendant_needs_sync = files
                .iter()
                .filter(|f| f.path.starts_with(&prefix))
                .any(|f| f.status.needs_sync())
                || statuses
                    .iter()
                    .any(|(path, status)| path.starts_with(&prefix) && status.needs_sync());

            let title = directory_title(dir);
            let record = metadata.directory(dir);
            let status = classify_directory(record, &digest, any_descendant_needs_sync);
            let cached_id = record.and_then(|r| r.page_id.as_deref());
            let status = confirm_remote(&self.client, space, status, &title, cached_id).await;
            debug!("{}/: {}", dir, status);

            statuses.insert(dir.clone(), status);
            planned.push(PlannedDirectory {
                path: dir.clone(),
                title,
                digest,
                status,
                descendant_files,
            });
        }

        planned.reverse();
        planned
    }

    async fn execute<P>(&self, options: &SyncOptions, confirm: P) -> Result<SyncSummary>
    where
        P: FnOnce(&SyncPlan) -> bool,
    {
        let plan = self.build_plan(options).await?;
        let mut summary = SyncSummary {
            divergences: plan.divergences.clone(),
            ..SyncSummary::default()
        };
        for failure in &plan.failures {
            summary.fail(failure.clone());
        }

        if options.dry_run {
            info!("Dry run: no changes made");
            summary.dry_run = true;
            summary.skipped = plan.count(SyncStatus::UpToDate);
            return Ok(summary);
        }

        // Fatal before any write: a partial run would leave diagrams missing
        if self.settings.diagrams_enabled && plan.pending_diagrams() {
            let renderer = self.renderer.as_deref().ok_or(SyncError::RendererMissing)?;
            renderer.ensure_available().await?;
        }

        if !options.force && !confirm(&plan) {
            info!("Sync cancelled");
            summary.cancelled = true;
            return Ok(summary);
        }

        let SyncPlan {
            mut metadata,
            files,
            directories,
            ..
        } = plan;
        let space = self.settings.space_key.as_str();
        let root_parent = self.settings.root_parent_id.as_deref();

        // path -> page id of every directory synced in this run
        let mut dir_index: BTreeMap<String, String> = BTreeMap::new();
        let directory_sync = DirectorySync::new(&self.client, space);
        for dir in &directories {
            let parent_id = match resolve_parent(&dir.path, &dir_index, root_parent) {
                Ok(parent_id) => parent_id,
                Err(e) => {
                    error!("Skipping directory {}: {}", dir.path, e);
                    summary.fail(EntryFailure::new(dir.path.as_str(), e));
                    continue;
                }
            };
            let request = DirectoryRequest {
                path: &dir.path,
                parent_id: parent_id.as_deref(),
                status: dir.status,
                digest: &dir.digest,
                descendant_files: &dir.descendant_files,
            };
            match directory_sync
                .ensure_directory_page(request, &mut metadata)
                .await
            {
                Ok(synced) => {
                    debug!("{}/: {}", dir.path, synced.action.label());
                    dir_index.insert(dir.path.clone(), synced.page.id);
                    summary.record(synced.action);
                }
                Err(e) => {
                    error!("Failed to sync directory {}: {}", dir.path, e);
                    summary.fail(EntryFailure::new(dir.path.as_str(), e));
                }
            }
        }

        let mut file_sync = FileSync::new(&self.client, space, self.converter.as_ref());
        if self.settings.diagrams_enabled {
            file_sync = file_sync.with_diagrams(self.renderer.as_deref());
        }
        for file in &files {
            if !file.status.needs_sync() {
                debug!("Skipping up-to-date {}", file.path);
                summary.skipped += 1;
                continue;
            }
            let parent_id = match resolve_parent(&file.path, &dir_index, root_parent) {
                Ok(parent_id) => parent_id,
                Err(e) => {
                    error!("Skipping {}: {}", file.path, e);
                    summary.fail(EntryFailure::new(file.path.as_str(), e));
                    continue;
                }
            };
            let request = FileRequest {
                path: &file.path,
                document: &file.document,
                fingerprint: &file.fingerprint,
                status: file.status,
                parent_id: parent_id.as_deref(),
            };
            match file_sync.sync_file(request, &mut metadata).await {
                Ok(synced) => {
                    debug!("{}: {}", file.path, synced.action.label());
                    summary.record(synced.action);
                }
                Err(e) => {
                    error!("Failed to sync {}: {}", file.path, e);
                    summary.fail(EntryFailure::new(file.path.as_str(), e));
                }
            }
        }

        metadata.last_sync = Some(Utc::now());
        MetadataStore::new(&self.fs).save(&metadata).await?;

        info!(
            "Sync complete: {} created, {} updated, {} recreated, {} unchanged, {} skipped, {} failed",
            summary.created,
            summary.updated,
            summary.recreated,
            summary.unchanged,
            summary.skipped,
            summary.errors
        );
        Ok(summary)
    }
}
