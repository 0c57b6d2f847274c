//! repo-sync core library
//!
//! Replays the file changes of a push to one repository of a sync group onto
//! every other member, one branch and pull request per target.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use repo_sync_core::{SyncEngine, SyncServiceConfig};
//!
//! let config = SyncServiceConfig::from_file("sync.json")?;
//! let engine = SyncEngine::new(config, Arc::new(client));
//! let report = engine.execute("octo/models", &commits).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fakes;
pub mod hosting;
pub mod model;
pub mod obs;
pub mod target;
pub mod telemetry;

pub use config::{normalize_dir_prefix, ConfigError, RepositoryConfig, SyncOptions, SyncServiceConfig};
pub use engine::{SyncEngine, SyncReport, TargetStage};
pub use error::{SyncError, SyncResult};
pub use event::PushEvent;
pub use hosting::{
    FileDelete, FileWrite, HostingClient, HostingError, HostingResult, NewPullRequest,
};
pub use model::{Blob, ChangedFile, CommitIdentity, CommitInfo, FileStatus, PullRequest, RepoRef};
pub use target::TargetReport;
