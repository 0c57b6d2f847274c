//! Per-target replay task.
//!
//! A [`TargetSync`] owns everything needed to bring one target repository up
//! to date with a push: it creates the sync branch, replays every in-scope
//! file change of every distinct commit, opens the pull request and requests
//! review. Steps run strictly in that order; the first failure ends the task.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::engine::TargetStage;
use crate::error::{SyncError, SyncResult};
use crate::hosting::{FileDelete, FileWrite, HostingClient, HostingError, NewPullRequest};
use crate::model::{ChangedFile, CommitInfo, FileStatus, PullRequest, RepoRef};
use crate::obs;

/// Source-side facts shared by every target of one `execute` call.
#[derive(Debug)]
pub(crate) struct SyncPlan {
    /// Source repository exactly as given by the caller.
    pub source_label: String,
    pub source: RepoRef,
    /// Normalized directory prefix of the source config.
    pub source_prefix: String,
    pub branch_prefix: String,
    /// Distinct commits in push order.
    pub commits: Vec<CommitInfo>,
}

/// Millisecond stamps for branch names, strictly increasing per engine.
///
/// Normally the wall clock; bumped by one when two targets ask within the
/// same millisecond so concurrent targets never share a branch name.
#[derive(Debug, Default)]
pub(crate) struct BranchStamps {
    last: AtomicI64,
}

impl BranchStamps {
    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => now.max(prev + 1),
        }
    }
}

/// Outcome of a completed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: RepoRef,
    pub branch: String,
    /// Commit the sync branch was created from.
    pub base_sha: String,
    pub pull_request: PullRequest,
    pub files_written: usize,
    pub files_deleted: usize,
}

pub(crate) struct TargetSync {
    pub client: Arc<dyn HostingClient>,
    pub plan: Arc<SyncPlan>,
    pub target: RepositoryConfig,
    pub stamps: Arc<BranchStamps>,
}

#[derive(Default)]
struct ReplayCounts {
    written: usize,
    deleted: usize,
}

impl TargetSync {
    pub async fn run(self) -> SyncResult<TargetReport> {
        let repo = self.target.repo_ref();
        let target_prefix = self.target.dir_prefix();
        let mut stage = TargetStage::Idle;

        let base_sha = self
            .client
            .get_ref(&repo, &format!("heads/{}", self.target.branch))
            .await
            .map_err(|e| self.upstream(stage, e))?;

        let branch = format!("{}-{}", self.plan.branch_prefix, self.stamps.next());
        self.client
            .create_ref(&repo, &format!("refs/heads/{branch}"), &base_sha)
            .await
            .map_err(|e| self.upstream(stage, e))?;
        stage = TargetStage::BranchCreated;
        obs::emit_target_stage(&repo, stage, &branch);

        let mut counts = ReplayCounts::default();
        for commit in &self.plan.commits {
            self.replay_commit(&repo, &target_prefix, &branch, commit, &mut counts)
                .await?;
        }
        stage = TargetStage::FilesReplayed;
        obs::emit_target_stage(&repo, stage, &branch);

        let title = format!("Sync models directory with {}", self.plan.source_label);
        let body = pull_request_body(&self.plan, &target_prefix);
        let pull_request = self
            .client
            .create_pull_request(
                &repo,
                NewPullRequest {
                    head: &branch,
                    base: &self.target.branch,
                    title: &title,
                    body: &body,
                },
            )
            .await
            .map_err(|e| self.upstream(stage, e))?;
        stage = TargetStage::PullRequestOpened;
        obs::emit_target_stage(&repo, stage, &branch);

        self.client
            .request_reviewers(&repo, pull_request.number, &[self.target.owner.clone()])
            .await
            .map_err(|e| self.upstream(stage, e))?;
        stage = TargetStage::ReviewRequested;
        obs::emit_target_stage(&repo, stage, &branch);

        Ok(TargetReport {
            target: repo,
            branch,
            base_sha,
            pull_request,
            files_written: counts.written,
            files_deleted: counts.deleted,
        })
    }

    async fn replay_commit(
        &self,
        repo: &RepoRef,
        target_prefix: &str,
        branch: &str,
        commit: &CommitInfo,
        counts: &mut ReplayCounts,
    ) -> SyncResult<()> {
        let stage = TargetStage::BranchCreated;
        let files = self
            .client
            .get_commit(&self.plan.source, &commit.id)
            .await
            .map_err(|e| self.upstream(stage, e))?;
        let message = commit_message(commit, &self.plan.source);

        for file in files
            .iter()
            .filter(|f| in_scope(&f.filename, &self.plan.source_prefix))
        {
            let path = rebase_path(&file.filename, &self.plan.source_prefix, target_prefix);
            match file.status {
                FileStatus::Added | FileStatus::Modified => {
                    self.write_file(repo, file, &path, &message, branch).await?;
                    counts.written += 1;
                }
                FileStatus::Removed => {
                    self.delete_file(repo, &path, &message, branch).await?;
                    counts.deleted += 1;
                }
                FileStatus::Renamed => {
                    match file
                        .previous_filename
                        .as_deref()
                        .filter(|prev| in_scope(prev, &self.plan.source_prefix))
                    {
                        Some(prev) => {
                            let old_path =
                                rebase_path(prev, &self.plan.source_prefix, target_prefix);
                            self.delete_file(repo, &old_path, &message, branch).await?;
                            counts.deleted += 1;
                        }
                        None => debug!(
                            file = %file.filename,
                            "rename source outside synced directory, writing new path only"
                        ),
                    }
                    self.write_file(repo, file, &path, &message, branch).await?;
                    counts.written += 1;
                }
                FileStatus::Other => {
                    debug!(file = %file.filename, "skipping change with unsupported status");
                    continue;
                }
            }
            obs::emit_file_replayed(repo, &path, file.status);
        }
        Ok(())
    }

    async fn write_file(
        &self,
        repo: &RepoRef,
        file: &ChangedFile,
        path: &str,
        message: &str,
        branch: &str,
    ) -> SyncResult<()> {
        let stage = TargetStage::BranchCreated;
        let blob = self
            .client
            .get_blob(&self.plan.source, &file.sha)
            .await
            .map_err(|e| self.upstream(stage, e))?;
        let content = blob.decode().map_err(|reason| SyncError::Decode {
            target: self.target.repo_ref(),
            path: file.filename.clone(),
            reason,
        })?;
        self.client
            .create_or_update_file_contents(
                repo,
                FileWrite {
                    path,
                    message,
                    content: &content,
                    branch,
                },
            )
            .await
            .map_err(|e| self.upstream(stage, e))
    }

    /// The delete API needs the blob id being removed, so look it up first.
    async fn delete_file(
        &self,
        repo: &RepoRef,
        path: &str,
        message: &str,
        branch: &str,
    ) -> SyncResult<()> {
        let stage = TargetStage::BranchCreated;
        let sha = self
            .client
            .get_content(repo, path, branch)
            .await
            .map_err(|e| self.upstream(stage, e))?;
        self.client
            .delete_file(
                repo,
                FileDelete {
                    path,
                    message,
                    sha: &sha,
                    branch,
                },
            )
            .await
            .map_err(|e| self.upstream(stage, e))
    }

    fn upstream(&self, stage: TargetStage, source: HostingError) -> SyncError {
        SyncError::Upstream {
            target: self.target.repo_ref(),
            stage,
            source,
        }
    }
}

/// Whether `filename` lies under the normalized directory `prefix`.
pub(crate) fn in_scope(filename: &str, prefix: &str) -> bool {
    filename.starts_with(prefix)
}

/// Swap the `from` directory prefix of `filename` for `to`.
pub(crate) fn rebase_path(filename: &str, from: &str, to: &str) -> String {
    let rest = filename.strip_prefix(from).unwrap_or(filename);
    format!("{to}{rest}")
}

pub(crate) fn commit_message(commit: &CommitInfo, source: &RepoRef) -> String {
    format!("Sync {} from {}: {}", commit.id, source, commit.summary())
}

pub(crate) fn pull_request_body(plan: &SyncPlan, target_prefix: &str) -> String {
    let mut body = format!(
        "Automated sync of changes pushed to {}.\n\n",
        plan.source_label
    );
    if plan.commits.is_empty() {
        body.push_str("No distinct commits were included in this push.\n");
    } else {
        body.push_str("Commits:\n");
        for commit in &plan.commits {
            body.push_str(&format!("- {} {}\n", commit.short_id(), commit.summary()));
        }
    }
    body.push_str(&format!(
        "\nPath mapping: `{}/{}` -> `{}`\n",
        plan.source,
        plan.source_prefix,
        if target_prefix.is_empty() {
            "/"
        } else {
            target_prefix
        }
    ));
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommitIdentity;

    fn commit(id: &str, message: &str) -> CommitInfo {
        CommitInfo {
            id: id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            author: CommitIdentity::default(),
            committer: CommitIdentity::default(),
            tree_id: "tree".to_string(),
            distinct: true,
            url: String::new(),
        }
    }

    #[test]
    fn test_in_scope_uses_directory_prefix() {
        assert!(in_scope("models/a.bin", "models/"));
        assert!(in_scope("models/nested/b.bin", "models/"));
        assert!(!in_scope("modelsx/a.bin", "models/"));
        assert!(!in_scope("models", "models/"));
        assert!(in_scope("anything.txt", ""));
    }

    #[test]
    fn test_rebase_path_keeps_remainder() {
        assert_eq!(
            rebase_path("models/nested/a.bin", "models/", "vendor/models/"),
            "vendor/models/nested/a.bin"
        );
        assert_eq!(rebase_path("models/a.bin", "models/", ""), "a.bin");
        assert_eq!(rebase_path("a.bin", "", "models/"), "models/a.bin");
    }

    #[test]
    fn test_commit_message_references_source_commit() {
        let c = commit("abc123def", "Tune weights\n\nbody");
        let msg = commit_message(&c, &RepoRef::new("A", "a"));
        assert_eq!(msg, "Sync abc123def from A/a: Tune weights");
    }

    #[test]
    fn test_branch_stamps_strictly_increase() {
        let stamps = BranchStamps::default();
        let mut prev = stamps.next();
        for _ in 0..100 {
            let next = stamps.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_pull_request_body_lists_commits() {
        let plan = SyncPlan {
            source_label: "A/a".to_string(),
            source: RepoRef::new("A", "a"),
            source_prefix: "models/".to_string(),
            branch_prefix: "sync".to_string(),
            commits: vec![commit("1111111aaaa", "first"), commit("2222222bbbb", "second")],
        };
        let body = pull_request_body(&plan, "lib/models/");
        assert!(body.contains("- 1111111 first"));
        assert!(body.contains("- 2222222 second"));
        assert!(body.contains("`A/a/models/` -> `lib/models/`"));
    }

    #[test]
    fn test_pull_request_body_without_commits() {
        let plan = SyncPlan {
            source_label: "A/a".to_string(),
            source: RepoRef::new("A", "a"),
            source_prefix: String::new(),
            branch_prefix: "sync".to_string(),
            commits: vec![],
        };
        let body = pull_request_body(&plan, "");
        assert!(body.contains("No distinct commits"));
        assert!(body.contains("`A/a/` -> `/`"));
    }
}
