//! Structured observability hooks for sync lifecycle events.
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`). Per-file
//! events are `debug!` since a large push produces one line per file and
//! target.

use tracing::{debug, info, warn};

use crate::engine::TargetStage;
use crate::error::SyncError;
use crate::model::{FileStatus, RepoRef};

/// Emit event: sync run accepted for `source`.
pub fn emit_sync_started(source: &RepoRef, commits: usize, distinct: usize, targets: usize) {
    info!(
        event = "sync.started",
        source = %source,
        commits = commits,
        distinct_commits = distinct,
        targets = targets,
    );
}

/// Emit event: a target advanced to `stage`.
pub fn emit_target_stage(target: &RepoRef, stage: TargetStage, branch: &str) {
    info!(
        event = "sync.target.stage",
        target = %target,
        stage = stage.as_str(),
        branch = %branch,
    );
}

/// Emit event: one file change replayed onto a target branch.
pub fn emit_file_replayed(target: &RepoRef, path: &str, status: FileStatus) {
    debug!(event = "sync.file.replayed", target = %target, path = %path, status = %status);
}

/// Emit event: every target finished.
pub fn emit_sync_finished(source: &RepoRef, targets: usize, duration_ms: u128) {
    info!(
        event = "sync.finished",
        source = %source,
        targets = targets,
        duration_ms = duration_ms as u64,
    );
}

/// Emit event: the run aborted (warning level).
pub fn emit_sync_failed(source: &RepoRef, error: &SyncError) {
    warn!(event = "sync.failed", source = %source, error = %error);
}
