//! Divergence Detector: cached expectations vs. live remote titles.
//!
//! Read-only. It never writes to the remote service and never touches the
//! metadata; reports are advisory.

use tracing::{debug, warn};

use crate::directory_sync::directory_title;
use crate::hierarchy::HierarchyEntry;
use crate::metadata::SyncMetadata;
use crate::remote::{PageClient, RemoteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    File,
    Directory,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Directory => "directory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    /// Renamed on the remote side only; the remote title is kept
    RemoteRename,
    /// Renamed locally only; the next sync updates the remote title
    LocalRename,
    /// Local, remote and cached titles all differ
    Conflict,
    /// The cached page no longer exists
    RemoteMissing,
    /// Cached record whose local source is gone
    Orphaned,
}

impl DivergenceKind {
    pub fn label(self) -> &'static str {
        match self {
            DivergenceKind::RemoteRename => "remote rename",
            DivergenceKind::LocalRename => "local rename",
            DivergenceKind::Conflict => "conflict",
            DivergenceKind::RemoteMissing => "remote missing",
            DivergenceKind::Orphaned => "orphaned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameDetection {
    pub entity: EntityKind,
    pub kind: DivergenceKind,
    pub local_path: String,
    /// Title derived from the local source (cached title for orphans)
    pub expected_title: String,
    /// Live remote title, when the page could be fetched
    pub actual_title: Option<String>,
    pub cached_title: String,
    pub page_id: String,
    pub severity: Severity,
    pub recommendation: String,
}

/// Whether `path` is `root` or lies beneath it.
fn within(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Titles of one cached entity, as seen from each side.
#[derive(Debug, Clone, Copy)]
struct Titles<'a> {
    /// Derived from the local source now
    local: &'a str,
    /// Derived from the local source at last sync
    cached: &'a str,
    /// Remote title recorded at last sync
    published: &'a str,
}

/// Three-way title comparison. `None` when nothing diverged.
pub fn compare_titles(cached: &str, local: &str, remote: &str) -> Option<DivergenceKind> {
    if local == remote {
        None
    } else if cached == local {
        Some(DivergenceKind::RemoteRename)
    } else if cached == remote {
        Some(DivergenceKind::LocalRename)
    } else {
        Some(DivergenceKind::Conflict)
    }
}

fn recommendation(kind: DivergenceKind, local: &str, remote: &str) -> String {
    match kind {
        DivergenceKind::RemoteRename => {
            format!("Remote title '{}' is kept; rename the local document to match", remote)
        }
        DivergenceKind::LocalRename => format!("Next sync renames the page to '{}'", local),
        DivergenceKind::Conflict => "Titles changed on both sides; resolve manually".to_string(),
        DivergenceKind::RemoteMissing => "Page will be recreated on the next sync".to_string(),
        DivergenceKind::Orphaned => "Local source removed; archive or delete the page".to_string(),
    }
}

pub struct DivergenceDetector<'a, C: PageClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: PageClient + ?Sized> DivergenceDetector<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Compare every cached entity against the remote and the local set.
    ///
    /// `skipped` holds paths that failed to scan or parse this run. They and
    /// anything beneath them are not reported as orphans.
    pub async fn detect(
        &self,
        entries: &[HierarchyEntry],
        metadata: &SyncMetadata,
        skipped: &[String],
    ) -> Vec<RenameDetection> {
        let mut detections = Vec::new();

        for entry in entries {
            let (entity, cached) = if entry.is_directory {
                let record = metadata.directory(&entry.path);
                (
                    EntityKind::Directory,
                    record.map(|r| (r.page_id.as_deref(), r.title.as_str(), r.title.as_str())),
                )
            } else {
                let record = metadata.file(&entry.path);
                (
                    EntityKind::File,
                    record.map(|r| (r.page_id.as_deref(), r.title.as_str(), r.published_title())),
                )
            };
            let Some((Some(page_id), cached_title, published_title)) = cached else {
                continue;
            };
            let titles = Titles {
                local: &entry.title,
                cached: cached_title,
                published: published_title,
            };
            if let Some(detection) = self.check_rename(entity, &entry.path, titles, page_id).await {
                detections.push(detection);
            }
        }

        detections.extend(self.orphans(entries, metadata, skipped).await);

        for detection in &detections {
            warn!(
                "{} {} ({}): {}",
                detection.kind.label(),
                detection.local_path,
                detection.severity.label(),
                detection.recommendation
            );
        }
        detections
    }

    async fn check_rename(
        &self,
        entity: EntityKind,
        path: &str,
        titles: Titles<'_>,
        page_id: &str,
    ) -> Option<RenameDetection> {
        let Titles {
            local: local_title,
            cached: cached_title,
            published,
        } = titles;
        let remote = match self.client.get_page(page_id).await {
            Ok(page) => page,
            Err(RemoteError::NotFound(_)) => {
                return Some(RenameDetection {
                    entity,
                    kind: DivergenceKind::RemoteMissing,
                    local_path: path.to_string(),
                    expected_title: local_title.to_string(),
                    actual_title: None,
                    cached_title: cached_title.to_string(),
                    page_id: page_id.to_string(),
                    severity: Severity::Warning,
                    recommendation: recommendation(DivergenceKind::RemoteMissing, local_title, ""),
                });
            }
            Err(e) => {
                debug!("Skipping divergence check of {}: {}", path, e);
                return None;
            }
        };

        // A page still carrying the title it was last given has not moved
        let remote_title = if remote.title == published {
            cached_title
        } else {
            remote.title.as_str()
        };
        let kind = compare_titles(cached_title, local_title, remote_title)?;
        let severity = match kind {
            DivergenceKind::Conflict => Severity::Warning,
            _ => Severity::Info,
        };
        Some(RenameDetection {
            entity,
            kind,
            local_path: path.to_string(),
            expected_title: local_title.to_string(),
            recommendation: recommendation(kind, local_title, &remote.title),
            actual_title: Some(remote.title),
            cached_title: cached_title.to_string(),
            page_id: page_id.to_string(),
            severity,
        })
    }

    /// Cached records with no local counterpart.
    async fn orphans(
        &self,
        entries: &[HierarchyEntry],
        metadata: &SyncMetadata,
        skipped: &[String],
    ) -> Vec<RenameDetection> {
        let present = |path: &str, is_directory: bool| {
            entries
                .iter()
                .any(|e| e.is_directory == is_directory && e.path == path)
                || skipped.iter().any(|s| within(path, s) || within(s, path))
        };
        let mut orphans = Vec::new();

        for (path, record) in &metadata.files {
            let Some(page_id) = &record.page_id else { continue };
            if present(path, false) {
                continue;
            }
            orphans.push(RenameDetection {
                entity: EntityKind::File,
                kind: DivergenceKind::Orphaned,
                local_path: path.clone(),
                expected_title: record.title.clone(),
                actual_title: None,
                cached_title: record.title.clone(),
                page_id: page_id.clone(),
                severity: Severity::Warning,
                recommendation: recommendation(DivergenceKind::Orphaned, "", ""),
            });
        }

        for (path, record) in &metadata.directories {
            let Some(page_id) = &record.page_id else { continue };
            if present(path, true) {
                continue;
            }
            let children = match self.client.get_child_pages(page_id).await {
                Ok(children) => children,
                Err(RemoteError::NotFound(_)) => {
                    debug!("Orphaned directory page {} for {} is already gone", page_id, path);
                    continue;
                }
                Err(e) => {
                    debug!("Skipping orphan check of {}: {}", path, e);
                    continue;
                }
            };
            let (severity, recommendation) = if children.is_empty() {
                (
                    Severity::Warning,
                    recommendation(DivergenceKind::Orphaned, "", ""),
                )
            } else {
                (
                    Severity::Critical,
                    format!(
                        "Directory removed locally but its page still has {} child page(s); move them before deleting",
                        children.len()
                    ),
                )
            };
            orphans.push(RenameDetection {
                entity: EntityKind::Directory,
                kind: DivergenceKind::Orphaned,
                local_path: path.clone(),
                expected_title: directory_title(path),
                actual_title: None,
                cached_title: record.title.clone(),
                page_id: page_id.clone(),
                severity,
                recommendation,
            });
        }

        orphans
    }
}
