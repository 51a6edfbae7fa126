//! Page hierarchy built from the flat list of local entries.
//!
//! A file's parent is its containing directory (none directly under the
//! root); a directory's parent is one level up. Nodes are indexed by path and
//! children are recorded in a parent-path map, then the forest is assembled
//! bottom-up from the index, so no node ever points at another.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::classify::SyncStatus;

/// One entry to place in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub path: String,
    pub title: String,
    pub status: SyncStatus,
    pub is_directory: bool,
}

/// Materialized hierarchy node used for display and traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSyncInfo {
    pub title: String,
    pub path: String,
    pub status: SyncStatus,
    /// Nesting level within the forest, 0 for roots
    pub level: usize,
    pub parent_path: Option<String>,
    pub is_directory: bool,
    pub children: Vec<PageSyncInfo>,
}

/// Containing directory of a path, `None` directly under the root.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Number of path segments.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Every ancestor directory of the given files, sorted by depth then path.
///
/// Only directories with at least one descendant document appear.
pub fn extract_directories<'a, I>(files: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dirs = BTreeSet::new();
    for file in files {
        let mut current = parent_path(file);
        while let Some(dir) = current {
            if !dirs.insert(dir.to_string()) {
                // Ancestors of a known directory are known too
                break;
            }
            current = parent_path(dir);
        }
    }

    let mut dirs: Vec<String> = dirs.into_iter().collect();
    sort_directories(&mut dirs);
    dirs
}

fn sort_directories(dirs: &mut [String]) {
    dirs.sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));
}

/// Directories by ascending depth, then files by path.
///
/// Syncing in this order guarantees every directory page exists before any
/// page beneath it.
pub fn processing_order(entries: &[HierarchyEntry]) -> Vec<&HierarchyEntry> {
    let mut dirs: Vec<&HierarchyEntry> = entries.iter().filter(|e| e.is_directory).collect();
    dirs.sort_by(|a, b| {
        depth(&a.path)
            .cmp(&depth(&b.path))
            .then_with(|| a.path.cmp(&b.path))
    });
    let mut files: Vec<&HierarchyEntry> = entries.iter().filter(|e| !e.is_directory).collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    dirs.extend(files);
    dirs
}

/// Build the forest of `PageSyncInfo` roots.
///
/// Roots are entries without a matching parent entry. Within a parent,
/// directories come before files.
pub fn build_tree(entries: Vec<HierarchyEntry>) -> Vec<PageSyncInfo> {
    let order: Vec<String> = processing_order(&entries)
        .into_iter()
        .map(|e| e.path.clone())
        .collect();

    let mut index: BTreeMap<String, HierarchyEntry> = entries
        .into_iter()
        .map(|entry| (entry.path.clone(), entry))
        .collect();

    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots = Vec::new();
    for path in &order {
        match parent_path(path).filter(|parent| index.contains_key(*parent)) {
            Some(parent) => children
                .entry(parent.to_string())
                .or_default()
                .push(path.clone()),
            None => roots.push(path.clone()),
        }
    }

    roots
        .iter()
        .filter_map(|root| assemble(root, 0, None, &mut index, &children))
        .collect()
}

fn assemble(
    path: &str,
    level: usize,
    parent: Option<&str>,
    index: &mut BTreeMap<String, HierarchyEntry>,
    children: &HashMap<String, Vec<String>>,
) -> Option<PageSyncInfo> {
    let entry = index.remove(path)?;
    let kids = children
        .get(path)
        .map(|paths| {
            paths
                .iter()
                .filter_map(|child| assemble(child, level + 1, Some(path), index, children))
                .collect()
        })
        .unwrap_or_default();

    Some(PageSyncInfo {
        title: entry.title,
        path: entry.path,
        status: entry.status,
        level,
        parent_path: parent.map(String::from),
        is_directory: entry.is_directory,
        children: kids,
    })
}

/// Pre-order walk of the forest.
pub fn flatten(roots: &[PageSyncInfo]) -> Vec<&PageSyncInfo> {
    let mut out = Vec::new();
    let mut stack: Vec<&PageSyncInfo> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}
