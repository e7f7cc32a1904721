//! Error types produced by the archive crate.
use std::io;
use thiserror::Error;

/// Errors raised while assembling the collection archive or its manifests.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// `add_file` or `close` was called after the archive was closed.
    #[error("tar archive is already closed")]
    Closed,
    /// The underlying sink rejected a write.
    #[error("failed writing tar entry {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Writing the tar trailer or flushing the sink failed.
    #[error("failed finalizing tar archive: {0}")]
    Finish(#[source] io::Error),
    /// Manifest metadata could not be encoded.
    #[error("failed encoding manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}
