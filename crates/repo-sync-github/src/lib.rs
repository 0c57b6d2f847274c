//! GitHub backend for repo-sync
//!
//! Provides [`GitHubClient`], a `reqwest` implementation of
//! [`repo_sync_core::HostingClient`], and [`connect`] to build a ready
//! [`SyncEngine`] from a sync config.

pub mod client;

use std::sync::Arc;

use repo_sync_core::{HostingResult, SyncEngine, SyncOptions, SyncServiceConfig};

pub use client::{GitHubClient, GitHubConfig, DEFAULT_API_URL};

/// Build an engine talking to the public GitHub API with the config's token.
pub fn connect(config: SyncServiceConfig) -> HostingResult<SyncEngine> {
    connect_with(config, DEFAULT_API_URL, SyncOptions::default())
}

/// Build an engine against `api_url` with explicit scheduling options.
pub fn connect_with(
    config: SyncServiceConfig,
    api_url: &str,
    options: SyncOptions,
) -> HostingResult<SyncEngine> {
    let github = GitHubConfig::new(&config.access_token).with_api_url(api_url);
    let client = GitHubClient::new(github)?;
    Ok(SyncEngine::with_options(config, Arc::new(client), options))
}
