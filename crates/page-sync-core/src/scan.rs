//! Local scan of the sync root.

use tracing::{debug, warn};

use crate::fs::{FileSystem, FsError};
use crate::hashing::Fingerprint;
use crate::metadata::normalize_path;

/// Extensions treated as documents
const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// A document found under the sync root.
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Normalized path relative to the sync root
    pub path: String,
    pub content: String,
    pub fingerprint: Fingerprint,
}

/// A document that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Readable documents, sorted by path
    pub files: Vec<LocalFile>,
    pub failures: Vec<ScanFailure>,
}

fn is_document(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| DOCUMENT_EXTENSIONS.iter().any(|d| ext.eq_ignore_ascii_case(d)))
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Walk the sync root, skipping hidden entries (including the metadata dir).
///
/// Unreadable documents are reported in `failures`; the walk continues.
pub async fn scan<F: FileSystem + ?Sized>(fs: &F) -> Result<ScanResult, FsError> {
    let mut result = ScanResult::default();
    let mut pending = vec![String::new()];

    while let Some(dir) = pending.pop() {
        let entries = match fs.list(&dir).await {
            Ok(entries) => entries,
            // The root itself must be listable
            Err(e) if dir.is_empty() => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir, e);
                result.failures.push(ScanFailure {
                    path: dir,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for entry in entries {
            if entry.name.starts_with('.') {
                continue;
            }
            let path = normalize_path(&join(&dir, &entry.name));
            if entry.is_dir {
                pending.push(path);
            } else if is_document(&entry.name) {
                match read_document(fs, &path).await {
                    Ok(file) => result.files.push(file),
                    Err(reason) => {
                        warn!("Skipping {}: {}", path, reason);
                        result.failures.push(ScanFailure { path, reason });
                    }
                }
            }
        }
    }

    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        "Scanned {} document(s), {} failure(s)",
        result.files.len(),
        result.failures.len()
    );
    Ok(result)
}

async fn read_document<F: FileSystem + ?Sized>(fs: &F, path: &str) -> Result<LocalFile, String> {
    let bytes = fs.read(path).await.map_err(|e| e.to_string())?;
    let stat = fs.stat(path).await.map_err(|e| e.to_string())?;
    let fingerprint = Fingerprint::new(&bytes, &stat);
    let content = String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
    Ok(LocalFile {
        path: path.to_string(),
        content,
        fingerprint,
    })
}
