//! Sync root on the local disk, via tokio::fs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use page_sync_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Disk filesystem confined to the sync root.
///
/// Relative paths that would leave the root (`..`, absolute paths) are
/// rejected rather than resolved.
pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FsError::Io(format!("{}: path escapes the sync root", path)));
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        io::ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
        io::ErrorKind::NotADirectory => FsError::NotDirectory(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

fn to_stat(metadata: &std::fs::Metadata) -> FileStat {
    let mtime_millis = metadata
        .modified()
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .ok()
        .and_then(|ms| u64::try_from(ms).ok())
        .unwrap_or(0);
    FileStat {
        mtime_millis,
        size: metadata.len(),
        is_dir: metadata.is_dir(),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(path, e))?;
        }
        fs::write(&target, content)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let mut dir = fs::read_dir(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io(path, e))? {
            // Follows symlinks, so a linked directory lists as a directory
            let is_dir = fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        let result = if self.stat(path).await?.is_dir {
            fs::remove_dir(&target).await
        } else {
            fs::remove_file(&target).await
        };
        result.map_err(|e| map_io(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(to_stat(&metadata))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (source, target) = (self.resolve(from)?, self.resolve(to)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(to, e))?;
        }
        fs::rename(source, target)
            .await
            .map_err(|e| map_io(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paths_outside_root_are_rejected() {
        let fs = NativeFs::new(PathBuf::from("/tmp/page-sync-root"));
        assert!(matches!(fs.read("../etc/passwd").await, Err(FsError::Io(_))));
        assert!(matches!(fs.write("a/../../b.md", b"x").await, Err(FsError::Io(_))));
    }

    #[test]
    fn test_root_and_trailing_slashes_resolve_inside_root() {
        let fs = NativeFs::new(PathBuf::from("/srv/docs"));
        assert_eq!(fs.resolve("").unwrap(), PathBuf::from("/srv/docs"));
        assert_eq!(fs.resolve("/guide.md").unwrap(), PathBuf::from("/srv/docs/guide.md"));
        assert_eq!(fs.resolve("api/").unwrap(), PathBuf::from("/srv/docs/api"));
    }
}
