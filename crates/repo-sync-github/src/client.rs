//! GitHub REST client
//!
//! Maps each [`HostingClient`] capability onto one GitHub REST endpoint.
//! Requests are sent once; retry and rate-limit handling are left to the
//! caller's scheduling.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use async_trait::async_trait;
use repo_sync_core::{
    Blob, ChangedFile, FileDelete, FileWrite, HostingClient, HostingError, HostingResult,
    NewPullRequest, PullRequest, RepoRef,
};

/// Public GitHub API root.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

/// Files per page when listing a commit's changes.
const COMMIT_FILES_PER_PAGE: usize = 100;

/// GitHub client configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API root, e.g. `https://github.example.com/api/v3` for Enterprise.
    pub api_url: String,
    /// Token sent as `Authorization: Bearer`.
    pub token: String,
    pub user_agent: String,
}

impl GitHubConfig {
    pub fn new(token: &str) -> Self {
        GitHubConfig {
            api_url: DEFAULT_API_URL.to_string(),
            token: token.to_string(),
            user_agent: format!("repo-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Point the client at a different API root.
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

/// [`HostingClient`] backed by the GitHub REST API.
pub struct GitHubClient {
    base: Url,
    token: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Serialize)]
struct CreateRefBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    sha: &'a str,
}

#[derive(Serialize)]
struct PutContentsBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Serialize)]
struct DeleteContentsBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Serialize)]
struct CreatePullBody<'a> {
    head: &'a str,
    base: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct ReviewersBody<'a> {
    reviewers: &'a [String],
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> HostingResult<Self> {
        let base = Url::parse(&config.api_url)
            .map_err(|e| HostingError::Transport(format!("invalid API url {}: {e}", config.api_url)))?;
        if base.cannot_be_a_base() {
            return Err(HostingError::Transport(format!(
                "invalid API url {}",
                config.api_url
            )));
        }
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| HostingError::Transport(e.to_string()))?;

        Ok(GitHubClient {
            base,
            token: config.token,
            http,
        })
    }

    /// `<api root>/repos/<owner>/<repo>/<segments...>`, each segment escaped.
    pub(crate) fn repo_url<'a>(
        &self,
        repo: &RepoRef,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["repos", repo.owner.as_str(), repo.repo.as_str()])
                .extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "github request");
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> HostingResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| HostingError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_status(status, &body, resource))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> HostingResult<T> {
        self.send(request, resource)
            .await?
            .json::<T>()
            .await
            .map_err(|e| HostingError::Decode(format!("{resource}: {e}")))
    }

    /// Current blob id of `path` on `branch`, `None` when it does not exist.
    async fn existing_sha(
        &self,
        repo: &RepoRef,
        path: &str,
        branch: &str,
    ) -> HostingResult<Option<String>> {
        match self.get_content(repo, path, branch).await {
            Ok(sha) => Ok(Some(sha)),
            Err(HostingError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success response onto [`HostingError`].
pub(crate) fn error_from_status(status: StatusCode, body: &str, resource: &str) -> HostingError {
    if status == StatusCode::NOT_FOUND {
        return HostingError::NotFound {
            resource: resource.to_string(),
        };
    }
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                trimmed.to_string()
            }
        });
    HostingError::Api {
        status: status.as_u16(),
        message: format!("{resource}: {message}"),
    }
}

#[async_trait]
impl HostingClient for GitHubClient {
    async fn get_ref(&self, repo: &RepoRef, git_ref: &str) -> HostingResult<String> {
        let url = self.repo_url(repo, ["git", "ref"].into_iter().chain(git_ref.split('/')));
        let resource = format!("{repo} ref {git_ref}");
        let body: RefResponse = self
            .send_json(self.request(Method::GET, url), &resource)
            .await?;
        Ok(body.object.sha)
    }

    async fn create_ref(&self, repo: &RepoRef, git_ref: &str, sha: &str) -> HostingResult<()> {
        let url = self.repo_url(repo, ["git", "refs"]);
        let resource = format!("{repo} ref {git_ref}");
        self.send(
            self.request(Method::POST, url)
                .json(&CreateRefBody { git_ref, sha }),
            &resource,
        )
        .await?;
        Ok(())
    }

    async fn get_commit(
        &self,
        repo: &RepoRef,
        commit_ref: &str,
    ) -> HostingResult<Vec<ChangedFile>> {
        let resource = format!("{repo} commit {commit_ref}");
        let mut files = Vec::new();
        let mut page = 1usize;
        loop {
            let url = self.repo_url(repo, ["commits", commit_ref]);
            let request = self.request(Method::GET, url).query(&[
                ("per_page", COMMIT_FILES_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ]);
            let body: CommitResponse = self.send_json(request, &resource).await?;
            let count = body.files.len();
            files.extend(body.files);
            if count < COMMIT_FILES_PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    async fn get_blob(&self, repo: &RepoRef, file_sha: &str) -> HostingResult<Blob> {
        let url = self.repo_url(repo, ["git", "blobs", file_sha]);
        let resource = format!("{repo} blob {file_sha}");
        self.send_json(self.request(Method::GET, url), &resource)
            .await
    }

    async fn get_content(
        &self,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
    ) -> HostingResult<String> {
        let url = self.repo_url(repo, std::iter::once("contents").chain(path.split('/')));
        let resource = format!("{repo} {path}@{git_ref}");
        let body: ContentResponse = self
            .send_json(
                self.request(Method::GET, url).query(&[("ref", git_ref)]),
                &resource,
            )
            .await?;
        Ok(body.sha)
    }

    async fn create_or_update_file_contents(
        &self,
        repo: &RepoRef,
        write: FileWrite<'_>,
    ) -> HostingResult<()> {
        // Updating an existing file requires its current blob id.
        let sha = self.existing_sha(repo, write.path, write.branch).await?;
        let url = self.repo_url(
            repo,
            std::iter::once("contents").chain(write.path.split('/')),
        );
        let resource = format!("{repo} {}@{}", write.path, write.branch);
        let body = PutContentsBody {
            message: write.message,
            content: B64.encode(write.content),
            branch: write.branch,
            sha,
        };
        self.send(self.request(Method::PUT, url).json(&body), &resource)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, repo: &RepoRef, delete: FileDelete<'_>) -> HostingResult<()> {
        let url = self.repo_url(
            repo,
            std::iter::once("contents").chain(delete.path.split('/')),
        );
        let resource = format!("{repo} {}@{}", delete.path, delete.branch);
        let body = DeleteContentsBody {
            message: delete.message,
            sha: delete.sha,
            branch: delete.branch,
        };
        self.send(self.request(Method::DELETE, url).json(&body), &resource)
            .await?;
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        pr: NewPullRequest<'_>,
    ) -> HostingResult<PullRequest> {
        let url = self.repo_url(repo, ["pulls"]);
        let resource = format!("{repo} pull request {} -> {}", pr.head, pr.base);
        let body = CreatePullBody {
            head: pr.head,
            base: pr.base,
            title: pr.title,
            body: pr.body,
        };
        self.send_json(self.request(Method::POST, url).json(&body), &resource)
            .await
    }

    async fn request_reviewers(
        &self,
        repo: &RepoRef,
        pull_number: u64,
        reviewers: &[String],
    ) -> HostingResult<()> {
        let number = pull_number.to_string();
        let url = self.repo_url(repo, ["pulls", number.as_str(), "requested_reviewers"]);
        let resource = format!("{repo} pull request #{pull_number}");
        self.send(
            self.request(Method::POST, url)
                .json(&ReviewersBody { reviewers }),
            &resource,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> GitHubClient {
        GitHubClient::new(GitHubConfig::new("t").with_api_url(api_url)).unwrap()
    }

    #[test]
    fn test_repo_url_escapes_segments() {
        let c = client("https://api.github.com");
        let repo = RepoRef::new("octo", "models");
        let url = c.repo_url(
            &repo,
            std::iter::once("contents").chain("models/with space/a#1.bin".split('/')),
        );
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octo/models/contents/models/with%20space/a%231.bin"
        );
    }

    #[test]
    fn test_repo_url_keeps_enterprise_prefix() {
        let c = client("https://github.example.com/api/v3/");
        let url = c.repo_url(&RepoRef::new("o", "r"), ["git", "ref", "heads", "main"]);
        assert_eq!(
            url.as_str(),
            "https://github.example.com/api/v3/repos/o/r/git/ref/heads/main"
        );
    }

    #[test]
    fn test_invalid_api_url_is_rejected() {
        let err = GitHubClient::new(GitHubConfig::new("t").with_api_url("not a url"))
            .err()
            .unwrap();
        assert!(matches!(err, HostingError::Transport(_)));
    }

    #[test]
    fn test_error_from_status_maps_not_found() {
        let err = error_from_status(StatusCode::NOT_FOUND, "{}", "o/r blob x");
        assert_eq!(
            err,
            HostingError::NotFound {
                resource: "o/r blob x".to_string()
            }
        );
    }

    #[test]
    fn test_error_from_status_uses_github_message() {
        let err = error_from_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"Reference already exists","documentation_url":"x"}"#,
            "o/r ref refs/heads/sync-1",
        );
        assert_eq!(
            err,
            HostingError::Api {
                status: 422,
                message: "o/r ref refs/heads/sync-1: Reference already exists".to_string()
            }
        );

        let err = error_from_status(StatusCode::BAD_GATEWAY, "", "o/r pulls");
        assert!(matches!(err, HostingError::Api { status: 502, ref message } if message.contains("Bad Gateway")));
    }

    #[test]
    fn test_put_body_omits_missing_sha() {
        let body = PutContentsBody {
            message: "m",
            content: B64.encode(b"hi"),
            branch: "b",
            sha: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"], "aGk=");
        assert!(json.get("sha").is_none());
    }
}
