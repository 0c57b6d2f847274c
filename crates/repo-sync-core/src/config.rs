//! Sync group configuration.
//!
//! A [`SyncServiceConfig`] lists every repository of the group together with
//! the subdirectory that is kept in sync and the base branch pull requests
//! target. Configs are loaded from JSON; field names accept both snake_case
//! and the camelCase spelling used by older deployments.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::RepoRef;

/// Errors raised while loading or validating a config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate repository in sync group: {0}")]
    DuplicateRepository(String),

    #[error("repository entry #{index} is missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("sync branch prefix must not be empty")]
    EmptyBranchPrefix,

    #[error("sync group needs at least two repositories, found {0}")]
    TooFewRepositories(usize),
}

/// One member of the sync group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub owner: String,
    pub repo: String,
    /// Directory prefix kept in sync. Empty means the repository root.
    #[serde(default)]
    pub path: String,
    /// Base branch for sync pull requests.
    pub branch: String,
}

impl RepositoryConfig {
    pub fn new(owner: &str, repo: &str, path: &str, branch: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repo)
    }

    /// `path` normalized to a directory prefix, see [`normalize_dir_prefix`].
    pub fn dir_prefix(&self) -> String {
        normalize_dir_prefix(&self.path)
    }
}

/// Full configuration of a sync engine instance.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncServiceConfig {
    pub repositories: Vec<RepositoryConfig>,
    #[serde(alias = "syncBranchPrefix")]
    pub sync_branch_prefix: String,
    #[serde(alias = "accessToken", default)]
    pub access_token: String,
}

impl std::fmt::Debug for SyncServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServiceConfig")
            .field("repositories", &self.repositories)
            .field("sync_branch_prefix", &self.sync_branch_prefix)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

impl SyncServiceConfig {
    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Replace the access token, e.g. with one taken from the environment.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Check the group for problems the engine itself does not guard against.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_branch_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyBranchPrefix);
        }
        if self.repositories.len() < 2 {
            return Err(ConfigError::TooFewRepositories(self.repositories.len()));
        }

        let mut seen = HashSet::new();
        for (index, repo) in self.repositories.iter().enumerate() {
            for (field, value) in [
                ("owner", &repo.owner),
                ("repo", &repo.repo),
                ("branch", &repo.branch),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::MissingField { index, field });
                }
            }
            if !seen.insert(repo.repo_ref()) {
                return Err(ConfigError::DuplicateRepository(repo.repo_ref().to_string()));
            }
        }
        Ok(())
    }
}

/// Execution knobs that are not part of the sync group itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Targets processed at once. `1` processes them strictly in order.
    pub max_concurrent_targets: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_targets: 1,
        }
    }
}

/// Normalize a configured path into a directory prefix.
///
/// Leading `./` and `/` are stripped and a trailing `/` is ensured, so
/// `models` matches `models/a.bin` but not `modelsx/a.bin`. The repository
/// root (`""`, `"."`, `"/"`) normalizes to the empty prefix.
pub fn normalize_dir_prefix(path: &str) -> String {
    let mut p = path.trim();
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            break;
        }
    }
    let p = p.trim_end_matches('/');
    if p.is_empty() || p == "." {
        String::new()
    } else {
        format!("{p}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> SyncServiceConfig {
        SyncServiceConfig {
            repositories: vec![
                RepositoryConfig::new("A", "a", "models", "main"),
                RepositoryConfig::new("B", "b", "vendor/models/", "develop"),
            ],
            sync_branch_prefix: "sync".to_string(),
            access_token: "t0ken".to_string(),
        }
    }

    #[test]
    fn test_normalize_dir_prefix() {
        assert_eq!(normalize_dir_prefix("models"), "models/");
        assert_eq!(normalize_dir_prefix("models/"), "models/");
        assert_eq!(normalize_dir_prefix("./models//"), "models/");
        assert_eq!(normalize_dir_prefix("/a/b"), "a/b/");
        assert_eq!(normalize_dir_prefix(""), "");
        assert_eq!(normalize_dir_prefix("/"), "");
        assert_eq!(normalize_dir_prefix("."), "");
    }

    #[test]
    fn test_validate_accepts_well_formed_group() {
        assert!(group().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut cfg = group();
        cfg.repositories
            .push(RepositoryConfig::new("A", "a", "other", "main"));
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateRepository(r)) if r == "A/a"
        ));
    }

    #[test]
    fn test_validate_rejects_missing_fields_and_prefix() {
        let mut cfg = group();
        cfg.repositories[1].branch = String::new();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::MissingField {
                index: 1,
                field: "branch"
            })
        ));

        let mut cfg = group();
        cfg.sync_branch_prefix = " ".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyBranchPrefix)));

        let mut cfg = group();
        cfg.repositories.truncate(1);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::TooFewRepositories(1))
        ));
    }

    #[test]
    fn test_from_file_accepts_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(
            &path,
            r#"{
                "repositories": [
                    {"owner": "A", "repo": "a", "path": "models/", "branch": "main"},
                    {"owner": "B", "repo": "b", "path": "models/", "branch": "main"}
                ],
                "syncBranchPrefix": "sync-models",
                "accessToken": "abc"
            }"#,
        )
        .unwrap();

        let cfg = SyncServiceConfig::from_file(&path).unwrap();
        assert_eq!(cfg.sync_branch_prefix, "sync-models");
        assert_eq!(cfg.access_token, "abc");
        assert_eq!(cfg.repositories[1].repo_ref(), RepoRef::new("B", "b"));
    }

    #[test]
    fn test_from_file_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SyncServiceConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", group());
        assert!(!rendered.contains("t0ken"));
        assert!(rendered.contains("<redacted>"));
    }
}
