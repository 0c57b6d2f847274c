//! Push webhook payloads.
//!
//! Only the fields the engine needs are read; everything else in the GitHub
//! push event is ignored.

use std::path::Path;

use serde::Deserialize;

use crate::model::CommitInfo;

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    /// `owner/repo`.
    pub full_name: String,
}

/// A GitHub `push` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Fully qualified ref that was pushed, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: PushRepository,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

impl PushEvent {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(std::io::Error::other)
    }

    pub fn source_repository(&self) -> &str {
        &self.repository.full_name
    }

    /// Branch name when the push targeted a branch, `None` for tags.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    pub fn distinct_count(&self) -> usize {
        self.commits.iter().filter(|c| c.distinct).count()
    }
}
