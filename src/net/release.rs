//! GitHub latest-release asset resolution.
//!
//! A release entry names a repository and a filename glob. Resolution must
//! land on exactly one asset: zero matches is `NoMatchingAsset`, several
//! matches is `AmbiguousAsset` unless the entry opts into a tie-break.

use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::fetch::USER_AGENT;
use crate::error::{ProvisionError, Result};

/// Default GitHub REST API base
pub const GITHUB_API: &str = "https://api.github.com";

/// One downloadable file attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    /// `sha256:<hex>` when GitHub has computed it
    #[serde(default)]
    pub digest: Option<String>,
}

impl ReleaseAsset {
    /// Hex SHA-256 from the digest field, if present
    pub fn sha256(&self) -> Option<&str> {
        self.digest.as_deref().and_then(|d| d.strip_prefix("sha256:"))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// What to do when several assets match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Fail with `AmbiguousAsset`
    #[default]
    Reject,
    /// Take the first match in API order
    First,
    /// Take the match with the shortest file name
    ShortestName,
}

/// Filename pattern plus tie-break
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSelector {
    /// Glob matched against asset file names, e.g. `bat_*_amd64.deb`
    pub pattern: String,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl AssetSelector {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            tie_break: TieBreak::default(),
        }
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Pick exactly one asset from `assets`
    pub fn select<'a>(&self, repo: &str, assets: &'a [ReleaseAsset]) -> Result<&'a ReleaseAsset> {
        let pattern = glob::Pattern::new(&self.pattern).map_err(|e| {
            ProvisionError::Config(format!("invalid asset pattern '{}': {}", self.pattern, e))
        })?;
        let matches: Vec<&ReleaseAsset> = assets.iter().filter(|a| pattern.matches(&a.name)).collect();

        match (matches.len(), self.tie_break) {
            (0, _) => Err(ProvisionError::NoMatchingAsset {
                repo: repo.to_string(),
                pattern: self.pattern.clone(),
            }),
            (1, _) | (_, TieBreak::First) => Ok(matches[0]),
            (_, TieBreak::ShortestName) => Ok(matches
                .iter()
                .copied()
                .min_by_key(|a| a.name.len())
                .unwrap_or(matches[0])),
            (_, TieBreak::Reject) => Err(ProvisionError::AmbiguousAsset {
                repo: repo.to_string(),
                pattern: self.pattern.clone(),
                candidates: matches.iter().map(|a| a.name.clone()).collect(),
            }),
        }
    }
}

/// Client for the releases API
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl ReleaseClient {
    /// Create a client against `api_base`, authenticating with `token` if given
    pub fn new(api_base: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Resolve the single asset of `repo`'s latest release matching `selector`
    pub async fn latest_release_asset(&self, repo: &str, selector: &AssetSelector) -> Result<ReleaseAsset> {
        let release = self.latest_release(repo).await?;
        let asset = selector.select(repo, &release.assets)?;
        log::info!(
            "resolved {} {} '{}' to {}",
            repo,
            release.tag_name,
            selector.pattern,
            asset.name
        );
        Ok(asset.clone())
    }

    async fn latest_release(&self, repo: &str) -> Result<Release> {
        if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
            return Err(ProvisionError::Config(format!(
                "repository must be owner/name, got '{}'",
                repo
            )));
        }
        let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProvisionError::fetch(&url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::fetch(&url, format!("HTTP {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProvisionError::fetch(&url, e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }
}
