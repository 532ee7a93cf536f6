//! Source-hosting API client.
//!
//! Fetches the tag list and resolves refs to commit SHAs through the
//! GitHub REST API. Calls are blocking and never retried; an empty or
//! undecodable response aborts the run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const API_ROOT: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("imagematrix/", env!("CARGO_PKG_VERSION"));

/// Boundary trait for tag and commit lookups.
pub trait SourceHost {
    /// Tag names (with the `refs/tags/` prefix stripped) of a
    /// repository, e.g. `v4.7.3`.
    fn tag_names(&self, repo: &str) -> Result<Vec<String>>;

    /// Commit SHA a ref currently points at. The ref is a tag name or
    /// a branch name.
    fn commit_sha(&self, repo: &str, git_ref: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct RefEntry {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct CommitEntry {
    sha: String,
}

/// GitHub-backed implementation.
///
/// An optional bearer credential is read from `GITHUB_TOKEN`;
/// unauthenticated requests work but are rate-limited harder.
pub struct GitHubHost {
    agent: ureq::Agent,
    token: Option<String>,
}

impl Default for GitHubHost {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHubHost {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build(),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    fn get(&self, path: &str) -> ureq::Request {
        let url = format!("{API_ROOT}{path}");
        debug!("GET {url}");
        let mut request = self
            .agent
            .get(&url)
            .set("accept", "application/vnd.github.v3+json")
            .set("user-agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.set("authorization", &format!("Bearer {token}"));
        }
        request
    }
}

impl SourceHost for GitHubHost {
    fn tag_names(&self, repo: &str) -> Result<Vec<String>> {
        let entries: Vec<RefEntry> = self
            .get(&format!("/repos/{repo}/git/refs/tags"))
            .call()
            .with_context(|| format!("fetching tag list for '{repo}'"))?
            .into_json()
            .with_context(|| format!("decoding tag list for '{repo}'"))?;

        if entries.is_empty() {
            bail!("tag list for '{repo}' is empty");
        }
        Ok(entries
            .into_iter()
            .map(|entry| {
                entry
                    .ref_name
                    .strip_prefix("refs/tags/")
                    .unwrap_or(&entry.ref_name)
                    .to_string()
            })
            .collect())
    }

    fn commit_sha(&self, repo: &str, git_ref: &str) -> Result<String> {
        let commit: CommitEntry = self
            .get(&format!("/repos/{repo}/commits/{git_ref}"))
            .call()
            .with_context(|| format!("resolving '{git_ref}' in '{repo}'"))?
            .into_json()
            .with_context(|| format!("decoding commit for '{git_ref}' in '{repo}'"))?;

        if commit.sha.is_empty() {
            bail!("empty commit sha for '{git_ref}' in '{repo}'");
        }
        Ok(commit.sha)
    }
}
