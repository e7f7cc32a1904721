use std::io;

use archive::ArchiveError;
use sources::{CredhubError, OpsManagerError, UsageError};
use thiserror::Error;

/// Failure to produce a collection id.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct IdGenerationError(pub String);

/// Errors that abort a collection run. The archive is closed on every path.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("error generating collection id: {0}")]
    UuidGeneration(#[source] IdGenerationError),

    #[error("failed to collect from Ops Manager: {0}")]
    OpsManagerCollectFailure(#[from] OpsManagerError),

    #[error("failed to collect from Credhub: {0}")]
    CredhubCollectFailure(#[from] CredhubError),

    #[error("failed to collect from usage service: {0}")]
    UsageCollectFailure(#[from] UsageError),

    #[error("failed reading content of {name}: {source}")]
    ContentReadingFailure {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed writing {path} to archive: {source}")]
    DataWriteFailure {
        path: String,
        #[source]
        source: ArchiveError,
    },

    #[error("failed closing archive: {0}")]
    ArchiveCloseFailure(#[source] ArchiveError),
}
