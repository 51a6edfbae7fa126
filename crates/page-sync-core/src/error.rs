//! Engine-level error type.

use thiserror::Error;

use crate::convert::ConvertError;
use crate::diagram::DiagramError;
use crate::fs::FsError;
use crate::metadata::MetadataError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    #[error("Diagram error: {0}")]
    Diagram(#[from] DiagramError),

    /// A file was processed before its directory page existed
    #[error("Parent directory {parent} of {path} has not been synced")]
    ParentNotSynced { path: String, parent: String },

    #[error("Could not recreate {path}: titles '{title}' and '{suffixed_title}' are both taken")]
    RecoveryExhausted {
        path: String,
        title: String,
        suffixed_title: String,
    },

    #[error("Diagram rendering is enabled but no renderer is configured")]
    RendererMissing,
}

pub type Result<T> = std::result::Result<T, SyncError>;
