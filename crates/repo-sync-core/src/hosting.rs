//! Hosting API seam.
//!
//! [`HostingClient`] is the only way the engine talks to the source-control
//! host. Inject `GitHubClient` from `repo-sync-github` in production, or
//! [`MemoryHostingClient`](crate::fakes::MemoryHostingClient) in tests.
//!
//! Timeouts, retries and transport policy belong to the implementation; the
//! engine issues each call once and propagates any failure.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Blob, ChangedFile, PullRequest, RepoRef};

/// Errors surfaced by a hosting API implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostingError {
    /// The requested ref, commit, blob, file or pull request does not exist.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The host answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Convenience result alias.
pub type HostingResult<T> = std::result::Result<T, HostingError>;

/// Parameters for writing a whole file on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub message: &'a str,
    /// Raw file bytes. Implementations encode them as the wire format needs.
    pub content: &'a [u8],
    pub branch: &'a str,
}

/// Parameters for deleting a file on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDelete<'a> {
    pub path: &'a str,
    pub message: &'a str,
    /// Blob id of the file being removed.
    pub sha: &'a str,
    pub branch: &'a str,
}

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest<'a> {
    pub head: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

/// Capabilities the sync engine needs from the source-control host.
///
/// `git_ref` arguments use the short form (`heads/main`) for reads and the
/// fully qualified form (`refs/heads/main`) for [`create_ref`](Self::create_ref),
/// matching the git data API.
#[async_trait]
pub trait HostingClient: Send + Sync {
    /// Sha of the commit `git_ref` currently points at.
    async fn get_ref(&self, repo: &RepoRef, git_ref: &str) -> HostingResult<String>;

    /// Create `git_ref` pointing at `sha`.
    async fn create_ref(&self, repo: &RepoRef, git_ref: &str, sha: &str) -> HostingResult<()>;

    /// Files changed by the commit `commit_ref`.
    async fn get_commit(&self, repo: &RepoRef, commit_ref: &str)
        -> HostingResult<Vec<ChangedFile>>;

    /// Blob content by blob id.
    async fn get_blob(&self, repo: &RepoRef, file_sha: &str) -> HostingResult<Blob>;

    /// Blob id of the file at `path` on `git_ref`.
    async fn get_content(&self, repo: &RepoRef, path: &str, git_ref: &str)
        -> HostingResult<String>;

    /// Create `path`, or overwrite it when it already exists.
    async fn create_or_update_file_contents(
        &self,
        repo: &RepoRef,
        write: FileWrite<'_>,
    ) -> HostingResult<()>;

    /// Delete `path`.
    async fn delete_file(&self, repo: &RepoRef, delete: FileDelete<'_>) -> HostingResult<()>;

    /// Open a pull request.
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: NewPullRequest<'_>,
    ) -> HostingResult<PullRequest>;

    /// Request review on pull request `pull_number`.
    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        reviewers: &[String],
    ) -> HostingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosting_error_display() {
        let err = HostingError::Api {
            status: 422,
            message: "Reference already exists".to_string(),
        };
        assert_eq!(err.to_string(), "API error (422): Reference already exists");

        let err = HostingError::NotFound {
            resource: "A/a@heads/main".to_string(),
        };
        assert!(err.to_string().contains("A/a@heads/main"));
    }
}
