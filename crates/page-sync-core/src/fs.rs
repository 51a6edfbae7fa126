//! Filesystem access for the sync root.
//!
//! `InMemoryFs` backs the engine tests; the CLI provides `NativeFs` over
//! tokio::fs. Paths are relative to the sync root, `/`-separated, and the
//! empty string names the root itself.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone)]
pub struct FileStat {
    /// Milliseconds since the Unix epoch
    pub mtime_millis: u64,
    pub size: u64,
    pub is_dir: bool,
}

/// One child of a listed directory.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Base name, not the full path
    pub name: String,
    pub is_dir: bool,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file, creating missing parent directories.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Children of a directory, sorted by name.
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Remove a file or an empty directory.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create a directory and any missing ancestors.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Move a file over `to`, replacing any existing file there.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
enum Node {
    File { content: Vec<u8>, mtime_millis: u64 },
    Dir,
}

/// Filesystem held in a single path-ordered map.
///
/// Directories are explicit nodes, so empty directories survive until
/// deleted. Writes stamp the wall clock; `set_mtime` overrides it.
#[derive(Debug, Default)]
pub struct InMemoryFs {
    nodes: RwLock<BTreeMap<String, Node>>,
}

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Strict ancestors of `path`, nearest last. The root is not included.
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/').map(|(i, _)| &path[..i]).collect()
}

/// Insert every missing directory from the root down to `path` inclusive.
fn ensure_dirs(nodes: &mut BTreeMap<String, Node>, path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    for dir in ancestors(path).into_iter().chain(std::iter::once(path)) {
        match nodes.get(dir) {
            Some(Node::File { .. }) => return Err(FsError::NotDirectory(dir.to_string())),
            Some(Node::Dir) => {}
            None => {
                nodes.insert(dir.to_string(), Node::Dir);
            }
        }
    }
    Ok(())
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override a file's mtime, e.g. to simulate a `touch`.
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        let path = key(path);
        if let Some(Node::File { mtime_millis, .. }) = self.nodes.write().unwrap().get_mut(&path) {
            *mtime_millis = mtime;
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = key(path);
        match self.nodes.read().unwrap().get(&path) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Dir) => Err(FsError::IsDirectory(path)),
            None if path.is_empty() => Err(FsError::IsDirectory(path)),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = key(path);
        let mut nodes = self.nodes.write().unwrap();
        if path.is_empty() || matches!(nodes.get(&path), Some(Node::Dir)) {
            return Err(FsError::IsDirectory(path));
        }
        ensure_dirs(&mut nodes, parent_of(&path))?;
        nodes.insert(
            path,
            Node::File {
                content: content.to_vec(),
                mtime_millis: now_millis(),
            },
        );
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = key(path);
        let nodes = self.nodes.read().unwrap();
        match nodes.get(&path) {
            Some(Node::File { .. }) => return Err(FsError::NotDirectory(path)),
            None if !path.is_empty() => return Err(FsError::NotFound(path)),
            _ => {}
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, node)| {
                let name = &p[prefix.len()..];
                (!name.contains('/')).then(|| FileEntry {
                    name: name.to_string(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect();
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = key(path);
        let mut nodes = self.nodes.write().unwrap();
        match nodes.get(&path) {
            None => return Err(FsError::NotFound(path)),
            Some(Node::Dir) => {
                let prefix = format!("{}/", path);
                if nodes.range(prefix.clone()..).next().is_some_and(|(p, _)| p.starts_with(&prefix)) {
                    return Err(FsError::Io(format!("Directory not empty: {}", path)));
                }
            }
            Some(Node::File { .. }) => {}
        }
        nodes.remove(&path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = key(path);
        Ok(path.is_empty() || self.nodes.read().unwrap().contains_key(&path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = key(path);
        match self.nodes.read().unwrap().get(&path) {
            Some(Node::File {
                content,
                mtime_millis,
            }) => Ok(FileStat {
                mtime_millis: *mtime_millis,
                size: content.len() as u64,
                is_dir: false,
            }),
            Some(Node::Dir) => Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            }),
            None if path.is_empty() => Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            }),
            None => Err(FsError::NotFound(path)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        ensure_dirs(&mut self.nodes.write().unwrap(), &key(path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from, to) = (key(from), key(to));
        let mut nodes = self.nodes.write().unwrap();
        match nodes.get(&from) {
            Some(Node::File { .. }) => {}
            Some(Node::Dir) => return Err(FsError::IsDirectory(from)),
            None => return Err(FsError::NotFound(from)),
        }
        if matches!(nodes.get(&to), Some(Node::Dir)) {
            return Err(FsError::IsDirectory(to));
        }
        ensure_dirs(&mut nodes, parent_of(&to))?;
        if let Some(node) = nodes.remove(&from) {
            nodes.insert(to, node);
        }
        Ok(())
    }
}

// Lets tests keep a handle on the filesystem after handing it to the orchestrator
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }
}
