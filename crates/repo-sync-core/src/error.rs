//! Error types for the sync engine.

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::TargetStage;
use crate::hosting::HostingError;
use crate::model::RepoRef;

/// Errors produced by [`SyncEngine::execute`](crate::engine::SyncEngine::execute).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source repository string is not of the form `owner/repo`.
    #[error("The source repository must be in the format 'owner/repo'")]
    InvalidFormat,

    /// The source repository is not a member of the sync group.
    #[error("Source repository {repository} is not in the list of repositories to sync")]
    UnconfiguredSource { repository: String },

    /// A hosting API call failed while processing a target.
    #[error("sync to {target} failed while {stage}: {source}")]
    Upstream {
        target: RepoRef,
        stage: TargetStage,
        #[source]
        source: HostingError,
    },

    /// A source blob could not be decoded.
    #[error("sync to {target} failed to decode blob for {path}: {reason}")]
    Decode {
        target: RepoRef,
        path: String,
        reason: String,
    },

    /// A target worker panicked or was cancelled.
    #[error("target worker failed: {0}")]
    Worker(String),

    /// Invalid sync configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience result alias.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
