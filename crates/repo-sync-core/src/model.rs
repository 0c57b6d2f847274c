//! Data model shared by the engine, the hosting clients, and the CLI.
//!
//! The commit shape mirrors the commit objects of a GitHub push event so a
//! webhook payload can be handed to the engine without translation.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// An `owner/repo` pair identifying a repository on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoRef {
    type Err = SyncError;

    /// Accepts exactly `^[^/]+/[^/]+$`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(RepoRef::new(owner, repo))
            }
            _ => Err(SyncError::InvalidFormat),
        }
    }
}

/// Author or committer of a commit as reported by the push event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// One commit of a push.
///
/// `distinct` comes from the upstream event source and is trusted verbatim:
/// a commit is replayed iff it is `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub author: CommitIdentity,
    pub committer: CommitIdentity,
    pub tree_id: String,
    pub distinct: bool,
    pub url: String,
}

impl CommitInfo {
    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Seven-character abbreviation of the commit id.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// Change status of a file within a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    /// `copied`, `changed`, `unchanged` and anything newer. Never replayed.
    #[serde(other)]
    Other,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
            FileStatus::Renamed => "renamed",
            FileStatus::Other => "other",
        };
        f.write_str(s)
    }
}

/// A file touched by a commit, as listed by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: FileStatus,
    /// Blob id of the file's content after the commit.
    #[serde(default)]
    pub sha: String,
    /// Set only when `status` is [`FileStatus::Renamed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_filename: Option<String>,
}

/// Raw blob as returned by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub content: String,
    #[serde(default = "default_blob_encoding")]
    pub encoding: String,
}

fn default_blob_encoding() -> String {
    "base64".to_string()
}

impl Blob {
    /// Build a base64 blob from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            content: B64.encode(data),
            encoding: default_blob_encoding(),
        }
    }

    /// Decode the blob into raw bytes.
    ///
    /// Base64 content is accepted with embedded line breaks, which is how
    /// the GitHub API wraps it.
    pub fn decode(&self) -> Result<Vec<u8>, String> {
        match self.encoding.as_str() {
            "base64" => {
                let compact: String = self
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                B64.decode(compact).map_err(|e| e.to_string())
            }
            "utf-8" | "utf8" => Ok(self.content.clone().into_bytes()),
            other => Err(format!("unsupported blob encoding: {other}")),
        }
    }
}

/// A pull request opened on a target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parses_owner_and_repo() {
        let r: RepoRef = "octo/models".parse().unwrap();
        assert_eq!(r, RepoRef::new("octo", "models"));
        assert_eq!(r.to_string(), "octo/models");
    }

    #[test]
    fn test_repo_ref_rejects_malformed_identifiers() {
        for bad in ["", "octo", "/models", "octo/", "a/b/c", "/", "octo//models"] {
            let err = bad.parse::<RepoRef>().unwrap_err();
            assert!(matches!(err, SyncError::InvalidFormat), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_file_status_unknown_values_map_to_other() {
        let f: ChangedFile =
            serde_json::from_str(r#"{"filename":"a","status":"copied","sha":"s"}"#).unwrap();
        assert_eq!(f.status, FileStatus::Other);
        let f: ChangedFile = serde_json::from_str(
            r#"{"filename":"b","status":"renamed","sha":"s","previous_filename":"a"}"#,
        )
        .unwrap();
        assert_eq!(f.status, FileStatus::Renamed);
        assert_eq!(f.previous_filename.as_deref(), Some("a"));
    }

    #[test]
    fn test_blob_decode_tolerates_wrapped_base64() {
        let blob = Blob {
            content: "aGVsbG8g\nd29ybGQ=\n".to_string(),
            encoding: "base64".to_string(),
        };
        assert_eq!(blob.decode().unwrap(), b"hello world");
    }

    #[test]
    fn test_blob_decode_rejects_unknown_encoding() {
        let blob = Blob {
            content: "x".to_string(),
            encoding: "rot13".to_string(),
        };
        assert!(blob.decode().unwrap_err().contains("rot13"));
    }

    #[test]
    fn test_commit_summary_and_short_id() {
        let c = CommitInfo {
            id: "0123456789abcdef".to_string(),
            message: "Add weights\n\nLonger body".to_string(),
            timestamp: Utc::now(),
            author: CommitIdentity::default(),
            committer: CommitIdentity::default(),
            tree_id: "t".to_string(),
            distinct: true,
            url: String::new(),
        };
        assert_eq!(c.summary(), "Add weights");
        assert_eq!(c.short_id(), "0123456");
    }
}
