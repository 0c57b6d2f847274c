//! The sync engine.
//!
//! [`SyncEngine::execute`] takes the commits of one push to a member of the
//! sync group and, for every other member, creates a branch, replays the
//! in-scope file changes of the distinct commits onto it and opens a pull
//! request with the target owner as reviewer.
//!
//! The caller-supplied `distinct` flag is trusted verbatim: the engine never
//! checks whether a commit was already synced.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::{SyncOptions, SyncServiceConfig};
use crate::error::{SyncError, SyncResult};
use crate::hosting::HostingClient;
use crate::model::{CommitInfo, RepoRef};
use crate::obs;
use crate::target::{BranchStamps, SyncPlan, TargetReport, TargetSync};

/// Progress of a single target. Each step requires the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStage {
    Idle,
    BranchCreated,
    FilesReplayed,
    PullRequestOpened,
    ReviewRequested,
}

impl TargetStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStage::Idle => "idle",
            TargetStage::BranchCreated => "branch_created",
            TargetStage::FilesReplayed => "files_replayed",
            TargetStage::PullRequestOpened => "pull_request_opened",
            TargetStage::ReviewRequested => "review_requested",
        }
    }
}

/// Describes the step in flight while a target sits in this stage.
impl fmt::Display for TargetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStage::Idle => "creating the sync branch",
            TargetStage::BranchCreated => "replaying files",
            TargetStage::FilesReplayed => "opening the pull request",
            TargetStage::PullRequestOpened => "requesting review",
            TargetStage::ReviewRequested => "finished",
        };
        f.write_str(s)
    }
}

/// Outcome of [`SyncEngine::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub source: RepoRef,
    /// Number of distinct commits replayed onto every target.
    pub commits_synced: usize,
    /// One entry per target, in configured order.
    pub targets: Vec<TargetReport>,
}

/// Replays pushes across a fixed sync group.
pub struct SyncEngine {
    config: SyncServiceConfig,
    client: Arc<dyn HostingClient>,
    options: SyncOptions,
    /// `owner/repo` -> index into `config.repositories`, first occurrence wins.
    members: HashMap<RepoRef, usize>,
    stamps: Arc<BranchStamps>,
}

impl SyncEngine {
    /// Build an engine that processes targets one after another.
    ///
    /// The config is taken as is; call
    /// [`SyncServiceConfig::validate`] beforehand to reject malformed groups.
    pub fn new(config: SyncServiceConfig, client: Arc<dyn HostingClient>) -> Self {
        Self::with_options(config, client, SyncOptions::default())
    }

    pub fn with_options(
        config: SyncServiceConfig,
        client: Arc<dyn HostingClient>,
        options: SyncOptions,
    ) -> Self {
        let mut members = HashMap::with_capacity(config.repositories.len());
        for (idx, repo) in config.repositories.iter().enumerate() {
            members.entry(repo.repo_ref()).or_insert(idx);
        }
        Self {
            config,
            client,
            options,
            members,
            stamps: Arc::new(BranchStamps::default()),
        }
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &SyncServiceConfig {
        &self.config
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// Replay `commits`, pushed to `source_repository`, onto every other
    /// repository of the group.
    ///
    /// Validation happens before any hosting call. After that the first
    /// failure aborts the run; branches and pull requests already created
    /// for earlier targets stay in place.
    pub async fn execute(
        &self,
        source_repository: &str,
        commits: &[CommitInfo],
    ) -> SyncResult<SyncReport> {
        let source: RepoRef = source_repository.parse()?;
        let source_idx = self.members.get(&source).copied().ok_or_else(|| {
            SyncError::UnconfiguredSource {
                repository: source_repository.to_string(),
            }
        })?;
        let source_config = &self.config.repositories[source_idx];

        let plan = Arc::new(SyncPlan {
            source_label: source_repository.to_string(),
            source: source.clone(),
            source_prefix: source_config.dir_prefix(),
            branch_prefix: self.config.sync_branch_prefix.clone(),
            commits: commits.iter().filter(|c| c.distinct).cloned().collect(),
        });

        let jobs: Vec<TargetSync> = self
            .config
            .repositories
            .iter()
            .filter(|repo| repo.repo_ref() != source)
            .map(|target| TargetSync {
                client: Arc::clone(&self.client),
                plan: Arc::clone(&plan),
                target: target.clone(),
                stamps: Arc::clone(&self.stamps),
            })
            .collect();

        obs::emit_sync_started(&source, commits.len(), plan.commits.len(), jobs.len());
        let started = Instant::now();

        let result = if self.options.max_concurrent_targets <= 1 {
            run_sequential(jobs).await
        } else {
            run_pooled(jobs, self.options.max_concurrent_targets).await
        };

        match result {
            Ok(targets) => {
                obs::emit_sync_finished(&source, targets.len(), started.elapsed().as_millis());
                Ok(SyncReport {
                    source,
                    commits_synced: plan.commits.len(),
                    targets,
                })
            }
            Err(err) => {
                obs::emit_sync_failed(&source, &err);
                Err(err)
            }
        }
    }
}

fn target_span(job: &TargetSync) -> tracing::Span {
    tracing::info_span!("sync.target", target = %job.target.repo_ref())
}

async fn run_sequential(jobs: Vec<TargetSync>) -> SyncResult<Vec<TargetReport>> {
    let mut reports = Vec::with_capacity(jobs.len());
    for job in jobs {
        let span = target_span(&job);
        reports.push(job.run().instrument(span).await?);
    }
    Ok(reports)
}

/// Run at most `limit` targets at once. The first failure cancels the rest.
async fn run_pooled(jobs: Vec<TargetSync>, limit: usize) -> SyncResult<Vec<TargetReport>> {
    let total = jobs.len();
    let mut pending = jobs.into_iter().enumerate();
    let mut join_set = JoinSet::new();

    let mut spawn_next = |join_set: &mut JoinSet<(usize, SyncResult<TargetReport>)>| {
        if let Some((idx, job)) = pending.next() {
            let span = target_span(&job);
            join_set.spawn(async move { (idx, job.run().instrument(span).await) });
        }
    };

    for _ in 0..limit {
        spawn_next(&mut join_set);
    }

    let mut slots: Vec<Option<TargetReport>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        let (idx, result) = joined.map_err(|e| SyncError::Worker(e.to_string()))?;
        match result {
            Ok(report) => {
                slots[idx] = Some(report);
                spawn_next(&mut join_set);
            }
            Err(err) => {
                join_set.abort_all();
                return Err(err);
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| SyncError::Worker("target finished without a report".into())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::fakes::{HostingCall, MemoryHostingClient};
    use crate::model::{ChangedFile, CommitIdentity, FileStatus};
    use chrono::Utc;

    fn config(repos: &[(&str, &str)]) -> SyncServiceConfig {
        SyncServiceConfig {
            repositories: repos
                .iter()
                .map(|(o, r)| RepositoryConfig::new(o, r, "models", "main"))
                .collect(),
            sync_branch_prefix: "sync".to_string(),
            access_token: "token".to_string(),
        }
    }

    fn commit(id: &str, distinct: bool) -> CommitInfo {
        CommitInfo {
            id: id.to_string(),
            message: format!("commit {id}"),
            timestamp: Utc::now(),
            author: CommitIdentity::default(),
            committer: CommitIdentity::default(),
            tree_id: "tree".to_string(),
            distinct,
            url: String::new(),
        }
    }

    fn fake_for(cfg: &SyncServiceConfig) -> Arc<MemoryHostingClient> {
        let fake = Arc::new(MemoryHostingClient::new());
        for repo in &cfg.repositories {
            fake.add_branch(&repo.repo_ref(), &repo.branch, &format!("base-{}", repo.repo));
        }
        fake
    }

    #[tokio::test]
    async fn test_invalid_source_format_makes_no_calls() {
        let cfg = config(&[("A", "a"), ("B", "b")]);
        let fake = fake_for(&cfg);
        let engine = SyncEngine::new(cfg, fake.clone());

        let err = engine.execute("not-a-repo", &[commit("c1", true)]).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidFormat));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_source_makes_no_calls() {
        let cfg = config(&[("A", "a"), ("B", "b")]);
        let fake = fake_for(&cfg);
        let engine = SyncEngine::new(cfg, fake.clone());

        let err = engine.execute("C/c", &[commit("c1", true)]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Source repository C/c is not in the list of repositories to sync"
        );
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_one_branch_and_pull_request_per_target() {
        let cfg = config(&[("A", "a"), ("B", "b"), ("C", "c")]);
        let fake = fake_for(&cfg);
        let engine = SyncEngine::new(cfg, fake.clone());

        let report = engine.execute("B/b", &[]).await.unwrap();
        let targets: Vec<String> = report.targets.iter().map(|t| t.target.to_string()).collect();
        assert_eq!(targets, vec!["A/a", "C/c"]);
        for t in &report.targets {
            assert!(t.branch.starts_with("sync-"));
            assert!(t.branch["sync-".len()..].chars().all(|c| c.is_ascii_digit()));
            assert_eq!(t.base_sha, format!("base-{}", t.target.repo));
        }
        assert_ne!(report.targets[0].branch, report.targets[1].branch);
        assert_eq!(fake.pull_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_distinct_commits_are_never_fetched() {
        let cfg = config(&[("A", "a"), ("B", "b")]);
        let fake = fake_for(&cfg);
        fake.add_commit(
            &RepoRef::new("A", "a"),
            "kept",
            vec![ChangedFile {
                filename: "models/x.bin".to_string(),
                status: FileStatus::Added,
                sha: fake.add_blob(&RepoRef::new("A", "a"), b"x"),
                previous_filename: None,
            }],
        );
        let engine = SyncEngine::new(cfg, fake.clone());

        engine
            .execute("A/a", &[commit("kept", true), commit("merged", false)])
            .await
            .unwrap();

        let fetched: Vec<String> = fake
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HostingCall::GetCommit { commit_ref, .. } => Some(commit_ref),
                _ => None,
            })
            .collect();
        assert_eq!(fetched, vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_pooled_run_matches_sequential_report_order() {
        let cfg = config(&[("A", "a"), ("B", "b"), ("C", "c"), ("D", "d")]);
        let fake = fake_for(&cfg);
        let engine = SyncEngine::with_options(
            cfg,
            fake.clone(),
            SyncOptions {
                max_concurrent_targets: 2,
            },
        );

        let report = engine.execute("A/a", &[]).await.unwrap();
        let targets: Vec<String> = report.targets.iter().map(|t| t.target.to_string()).collect();
        assert_eq!(targets, vec!["B/b", "C/c", "D/d"]);

        let mut branches: Vec<&str> = report.targets.iter().map(|t| t.branch.as_str()).collect();
        branches.sort();
        branches.dedup();
        assert_eq!(branches.len(), 3);
    }

    #[tokio::test]
    async fn test_config_accessor_returns_config_verbatim() {
        let cfg = config(&[("A", "a"), ("B", "b")]);
        let engine = SyncEngine::new(cfg.clone(), Arc::new(MemoryHostingClient::new()));
        assert_eq!(engine.config(), &cfg);
        assert_eq!(engine.options().max_concurrent_targets, 1);
    }

    #[test]
    fn test_target_stage_display_names_pending_step() {
        assert_eq!(TargetStage::Idle.to_string(), "creating the sync branch");
        assert_eq!(TargetStage::PullRequestOpened.to_string(), "requesting review");
        assert_eq!(TargetStage::ReviewRequested.as_str(), "review_requested");
    }
}
