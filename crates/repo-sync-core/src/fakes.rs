//! In-memory fake of the hosting API (testing only)
//!
//! [`MemoryHostingClient`] keeps refs, branch trees, blobs, commits and pull
//! requests for any number of repositories, records every call in order, and
//! can be told to fail selected calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::hosting::{
    FileDelete, FileWrite, HostingClient, HostingError, HostingResult, NewPullRequest,
};
use crate::model::{Blob, ChangedFile, PullRequest, RepoRef};

/// A call received by the fake, with the arguments that matter to tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostingCall {
    GetRef {
        repo: RepoRef,
        git_ref: String,
    },
    CreateRef {
        repo: RepoRef,
        git_ref: String,
        sha: String,
    },
    GetCommit {
        repo: RepoRef,
        commit_ref: String,
    },
    GetBlob {
        repo: RepoRef,
        sha: String,
    },
    GetContent {
        repo: RepoRef,
        path: String,
        git_ref: String,
    },
    WriteFile {
        repo: RepoRef,
        path: String,
        branch: String,
        message: String,
    },
    DeleteFile {
        repo: RepoRef,
        path: String,
        branch: String,
        sha: String,
    },
    CreatePullRequest {
        repo: RepoRef,
        head: String,
        base: String,
        title: String,
    },
    RequestReviewers {
        repo: RepoRef,
        pull_number: u64,
        reviewers: Vec<String>,
    },
}

/// Discriminant of [`HostingCall`], used to select calls for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    GetRef,
    CreateRef,
    GetCommit,
    GetBlob,
    GetContent,
    WriteFile,
    DeleteFile,
    CreatePullRequest,
    RequestReviewers,
}

impl HostingCall {
    pub fn kind(&self) -> CallKind {
        match self {
            HostingCall::GetRef { .. } => CallKind::GetRef,
            HostingCall::CreateRef { .. } => CallKind::CreateRef,
            HostingCall::GetCommit { .. } => CallKind::GetCommit,
            HostingCall::GetBlob { .. } => CallKind::GetBlob,
            HostingCall::GetContent { .. } => CallKind::GetContent,
            HostingCall::WriteFile { .. } => CallKind::WriteFile,
            HostingCall::DeleteFile { .. } => CallKind::DeleteFile,
            HostingCall::CreatePullRequest { .. } => CallKind::CreatePullRequest,
            HostingCall::RequestReviewers { .. } => CallKind::RequestReviewers,
        }
    }

    pub fn repo(&self) -> &RepoRef {
        match self {
            HostingCall::GetRef { repo, .. }
            | HostingCall::CreateRef { repo, .. }
            | HostingCall::GetCommit { repo, .. }
            | HostingCall::GetBlob { repo, .. }
            | HostingCall::GetContent { repo, .. }
            | HostingCall::WriteFile { repo, .. }
            | HostingCall::DeleteFile { repo, .. }
            | HostingCall::CreatePullRequest { repo, .. }
            | HostingCall::RequestReviewers { repo, .. } => repo,
        }
    }
}

/// A pull request opened through the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPullRequest {
    pub repo: RepoRef,
    pub number: u64,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub reviewers: Vec<String>,
}

#[derive(Debug)]
struct FailureRule {
    kind: CallKind,
    repo: Option<RepoRef>,
    error: HostingError,
}

#[derive(Debug, Default)]
struct RepoState {
    /// `heads/<branch>` -> commit sha.
    refs: HashMap<String, String>,
    /// branch -> path -> blob sha.
    trees: HashMap<String, BTreeMap<String, String>>,
    /// commit sha -> tree at that commit.
    snapshots: HashMap<String, BTreeMap<String, String>>,
    blobs: HashMap<String, Vec<u8>>,
    /// Blobs served exactly as stored, encoding included.
    raw_blobs: HashMap<String, Blob>,
    commits: HashMap<String, Vec<ChangedFile>>,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<RepoRef, RepoState>,
    calls: Vec<HostingCall>,
    pulls: Vec<RecordedPullRequest>,
    failures: Vec<FailureRule>,
    next_id: u64,
}

impl State {
    fn next_sha(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:04}", self.next_id)
    }

    /// Record `call` and return the injected failure for it, if any.
    fn enter(&mut self, call: HostingCall) -> HostingResult<()> {
        let failure = self
            .failures
            .iter()
            .find(|rule| {
                rule.kind == call.kind() && rule.repo.as_ref().is_none_or(|r| r == call.repo())
            })
            .map(|rule| rule.error.clone());
        self.calls.push(call);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn repo(&self, repo: &RepoRef) -> HostingResult<&RepoState> {
        self.repos.get(repo).ok_or_else(|| not_found(repo, "repository"))
    }

    fn repo_mut(&mut self, repo: &RepoRef) -> HostingResult<&mut RepoState> {
        self.repos
            .get_mut(repo)
            .ok_or_else(|| not_found(repo, "repository"))
    }

    fn tree_mut(
        &mut self,
        repo: &RepoRef,
        branch: &str,
    ) -> HostingResult<&mut BTreeMap<String, String>> {
        self.repo_mut(repo)?
            .trees
            .get_mut(branch)
            .ok_or_else(|| not_found(repo, &format!("branch {branch}")))
    }
}

fn not_found(repo: &RepoRef, what: &str) -> HostingError {
    HostingError::NotFound {
        resource: format!("{repo}: {what}"),
    }
}

fn branch_of(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("heads/"))
        .unwrap_or(git_ref)
}

/// In-memory hosting API backed by per-repository maps.
#[derive(Debug, Default)]
pub struct MemoryHostingClient {
    state: Mutex<State>,
}

impl MemoryHostingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `branch` in `repo` pointing at commit `sha` with an empty tree.
    pub fn add_branch(&self, repo: &RepoRef, branch: &str, sha: &str) {
        let mut state = self.state.lock().unwrap();
        let repo_state = state.repos.entry(repo.clone()).or_default();
        repo_state
            .refs
            .insert(format!("heads/{branch}"), sha.to_string());
        repo_state.trees.entry(branch.to_string()).or_default();
        repo_state.snapshots.entry(sha.to_string()).or_default();
    }

    /// Store `content` as a blob in `repo` and return its sha.
    pub fn add_blob(&self, repo: &RepoRef, content: &[u8]) -> String {
        let mut state = self.state.lock().unwrap();
        let sha = state.next_sha("blob");
        state
            .repos
            .entry(repo.clone())
            .or_default()
            .blobs
            .insert(sha.clone(), content.to_vec());
        sha
    }

    /// Store `blob` verbatim, bypassing encoding, and return its sha.
    pub fn add_raw_blob(&self, repo: &RepoRef, blob: Blob) -> String {
        let mut state = self.state.lock().unwrap();
        let sha = state.next_sha("blob");
        state
            .repos
            .entry(repo.clone())
            .or_default()
            .raw_blobs
            .insert(sha.clone(), blob);
        sha
    }

    /// Place a file on an existing branch, also updating the snapshot of the
    /// branch head so branches created from it see the file.
    pub fn add_file(&self, repo: &RepoRef, branch: &str, path: &str, content: &[u8]) {
        let sha = self.add_blob(repo, content);
        let mut state = self.state.lock().unwrap();
        let repo_state = state.repos.entry(repo.clone()).or_default();
        repo_state
            .trees
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string(), sha.clone());
        if let Some(head) = repo_state.refs.get(&format!("heads/{branch}")).cloned() {
            repo_state
                .snapshots
                .entry(head)
                .or_default()
                .insert(path.to_string(), sha);
        }
    }

    /// Register the changed-file list of commit `sha`.
    pub fn add_commit(&self, repo: &RepoRef, sha: &str, files: Vec<ChangedFile>) {
        let mut state = self.state.lock().unwrap();
        state
            .repos
            .entry(repo.clone())
            .or_default()
            .commits
            .insert(sha.to_string(), files);
    }

    /// Make every matching call fail with `error`. `repo: None` matches all
    /// repositories.
    pub fn fail_on(&self, kind: CallKind, repo: Option<RepoRef>, error: HostingError) {
        let mut state = self.state.lock().unwrap();
        state.failures.push(FailureRule { kind, repo, error });
    }

    pub fn calls(&self) -> Vec<HostingCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<HostingCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect()
    }

    pub fn pull_requests(&self) -> Vec<RecordedPullRequest> {
        self.state.lock().unwrap().pulls.clone()
    }

    /// Content of `path` on `branch`, if present.
    pub fn file(&self, repo: &RepoRef, branch: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let repo_state = state.repos.get(repo)?;
        let sha = repo_state.trees.get(branch)?.get(path)?;
        repo_state.blobs.get(sha).cloned()
    }

    /// Branch names of `repo`, sorted.
    pub fn branches(&self, repo: &RepoRef) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .repos
            .get(repo)
            .map(|r| r.trees.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl HostingClient for MemoryHostingClient {
    async fn get_ref(&self, repo: &RepoRef, git_ref: &str) -> HostingResult<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::GetRef {
            repo: repo.clone(),
            git_ref: git_ref.to_string(),
        })?;
        let key = format!("heads/{}", branch_of(git_ref));
        state
            .repo(repo)?
            .refs
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(repo, git_ref))
    }

    async fn create_ref(&self, repo: &RepoRef, git_ref: &str, sha: &str) -> HostingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::CreateRef {
            repo: repo.clone(),
            git_ref: git_ref.to_string(),
            sha: sha.to_string(),
        })?;
        let branch = branch_of(git_ref).to_string();
        let repo_state = state.repo_mut(repo)?;
        let key = format!("heads/{branch}");
        if repo_state.refs.contains_key(&key) {
            return Err(HostingError::Api {
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        let tree = repo_state.snapshots.get(sha).cloned().unwrap_or_default();
        repo_state.refs.insert(key, sha.to_string());
        repo_state.trees.insert(branch, tree);
        Ok(())
    }

    async fn get_commit(
        &self,
        repo: &RepoRef,
        commit_ref: &str,
    ) -> HostingResult<Vec<ChangedFile>> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::GetCommit {
            repo: repo.clone(),
            commit_ref: commit_ref.to_string(),
        })?;
        state
            .repo(repo)?
            .commits
            .get(commit_ref)
            .cloned()
            .ok_or_else(|| not_found(repo, &format!("commit {commit_ref}")))
    }

    async fn get_blob(&self, repo: &RepoRef, file_sha: &str) -> HostingResult<Blob> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::GetBlob {
            repo: repo.clone(),
            sha: file_sha.to_string(),
        })?;
        let repo_state = state.repo(repo)?;
        if let Some(blob) = repo_state.raw_blobs.get(file_sha) {
            return Ok(blob.clone());
        }
        repo_state
            .blobs
            .get(file_sha)
            .map(|data| Blob::from_bytes(data))
            .ok_or_else(|| not_found(repo, &format!("blob {file_sha}")))
    }

    async fn get_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> HostingResult<String> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::GetContent {
            repo: repo.clone(),
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        let branch = branch_of(git_ref);
        state
            .repo(repo)?
            .trees
            .get(branch)
            .and_then(|tree| tree.get(path))
            .cloned()
            .ok_or_else(|| not_found(repo, &format!("{path}@{branch}")))
    }

    async fn create_or_update_file_contents(
        &self,
        repo: &RepoRef,
        write: FileWrite<'_>,
    ) -> HostingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::WriteFile {
            repo: repo.clone(),
            path: write.path.to_string(),
            branch: write.branch.to_string(),
            message: write.message.to_string(),
        })?;
        let sha = state.next_sha("blob");
        state.tree_mut(repo, write.branch)?;
        let repo_state = state.repo_mut(repo)?;
        repo_state.blobs.insert(sha.clone(), write.content.to_vec());
        if let Some(tree) = repo_state.trees.get_mut(write.branch) {
            tree.insert(write.path.to_string(), sha);
        }
        Ok(())
    }

    async fn delete_file(&self, repo: &RepoRef, delete: FileDelete<'_>) -> HostingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::DeleteFile {
            repo: repo.clone(),
            path: delete.path.to_string(),
            branch: delete.branch.to_string(),
            sha: delete.sha.to_string(),
        })?;
        let tree = state.tree_mut(repo, delete.branch)?;
        match tree.get(delete.path) {
            Some(current) if current == delete.sha => {
                tree.remove(delete.path);
                Ok(())
            }
            Some(_) => Err(HostingError::Api {
                status: 409,
                message: format!("{} does not match {}", delete.path, delete.sha),
            }),
            None => Err(not_found(repo, delete.path)),
        }
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: NewPullRequest<'_>,
    ) -> HostingResult<PullRequest> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::CreatePullRequest {
            repo: repo.clone(),
            head: pr.head.to_string(),
            base: pr.base.to_string(),
            title: pr.title.to_string(),
        })?;
        for branch in [pr.head, pr.base] {
            if !state.repo(repo)?.trees.contains_key(branch) {
                return Err(HostingError::Api {
                    status: 422,
                    message: format!("branch {branch} does not exist"),
                });
            }
        }
        let number = state.pulls.iter().filter(|p| &p.repo == repo).count() as u64 + 1;
        state.pulls.push(RecordedPullRequest {
            repo: repo.clone(),
            number,
            head: pr.head.to_string(),
            base: pr.base.to_string(),
            title: pr.title.to_string(),
            body: pr.body.to_string(),
            reviewers: Vec::new(),
        });
        Ok(PullRequest {
            number,
            html_url: format!("https://example.test/{repo}/pull/{number}"),
        })
    }

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        reviewers: &[String],
    ) -> HostingResult<()> {
        let mut state = self.state.lock().unwrap();
        state.enter(HostingCall::RequestReviewers {
            repo: repo.clone(),
            pull_number,
            reviewers: reviewers.to_vec(),
        })?;
        let pull = state
            .pulls
            .iter_mut()
            .find(|p| &p.repo == repo && p.number == pull_number)
            .ok_or_else(|| not_found(repo, &format!("pull request #{pull_number}")))?;
        pull.reviewers.extend(reviewers.iter().cloned());
        Ok(())
    }
}
