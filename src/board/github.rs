//! Task list stored as a JSON file in a GitHub repository.
//!
//! Reads and writes go through the REST "contents" endpoint. The blob `sha`
//! GitHub returns on read is the version token; a `PUT` carrying a stale
//! `sha` is rejected by GitHub, which surfaces here as a conflict.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::TaskData;
use super::persistence::{
    EMPTY_VERSION, Snapshot, TaskRepository, WriteOutcome, decode_task_data, encode_task_data,
};
use crate::errors::PersistenceError;

pub const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "taskboard";

/// Where the task file lives and how to reach it.
#[derive(Debug, Clone)]
pub struct GithubTarget {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub branch: Option<String>,
    pub token: String,
    pub commit_message: String,
}

impl GithubTarget {
    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            self.path.trim_start_matches('/')
        )
    }
}

/// Response from the contents endpoint (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct ContentsResponse {
    pub sha: String,
    pub content: Option<String>,
    pub encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UpdateContentsResponse {
    content: UpdatedContent,
}

#[derive(Debug, Deserialize)]
struct UpdatedContent {
    sha: String,
}

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; it does not verify the token is active or scoped.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Parse `(owner, repo)` from a GitHub URL or a bare `owner/repo` slug.
///
/// Handles:
/// - `owner/repo`
/// - `https://github.com/owner/repo`
/// - `https://github.com/owner/repo.git`
/// - `git@github.com:owner/repo.git`
pub fn parse_owner_repo(input: &str) -> Option<(String, String)> {
    let input = input.trim().trim_end_matches('/');
    let rest = if let Some(rest) = input.strip_prefix("https://github.com/") {
        rest
    } else if let Some(rest) = input.strip_prefix("git@github.com:") {
        rest
    } else if input.contains("://") || input.contains('@') {
        return None;
    } else {
        input
    };
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        Some((parts[0].to_string(), parts[1].to_string()))
    } else {
        None
    }
}

/// Decode the base64 `content` field. GitHub wraps it at 60 columns, so
/// whitespace is stripped first.
pub fn decode_contents(content: &str) -> Result<TaskData, PersistenceError> {
    let clean: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| PersistenceError::Decode(format!("invalid base64 content: {}", e)))?;
    decode_task_data(&bytes)
}

pub struct GithubRepository {
    client: reqwest::Client,
    target: GithubTarget,
}

impl GithubRepository {
    pub fn new(target: GithubTarget) -> Self {
        Self {
            client: reqwest::Client::new(),
            target,
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.target.contents_url())
            .header("Authorization", format!("Bearer {}", self.target.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
    }
}

#[async_trait]
impl TaskRepository for GithubRepository {
    async fn read(&self) -> Result<Snapshot, PersistenceError> {
        let mut req = self.request(reqwest::Method::GET);
        if let Some(branch) = &self.target.branch {
            req = req.query(&[("ref", branch.as_str())]);
        }
        let resp = req
            .send()
            .await
            .context("Failed to send contents request to GitHub")?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            info!(store = %self.describe(), "Task file not found, starting with an empty board");
            return Ok(Snapshot {
                data: TaskData::default(),
                version: EMPTY_VERSION.to_string(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PersistenceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: ContentsResponse = resp
            .json()
            .await
            .context("Failed to parse contents response from GitHub")?;
        if let Some(encoding) = body.encoding.as_deref()
            && encoding != "base64"
        {
            return Err(PersistenceError::Decode(format!(
                "unsupported content encoding '{}'",
                encoding
            )));
        }
        let content = body
            .content
            .ok_or_else(|| PersistenceError::Decode("no content in GitHub response".into()))?;
        let data = decode_contents(&content)?;

        debug!(sha = %body.sha, tasks = data.tasks.len(), "Read task file from GitHub");
        Ok(Snapshot {
            data,
            version: body.sha,
        })
    }

    async fn write(
        &self,
        data: &TaskData,
        previous_version: &str,
    ) -> Result<WriteOutcome, PersistenceError> {
        let content =
            base64::engine::general_purpose::STANDARD.encode(encode_task_data(data)?.as_bytes());
        let sha = (previous_version != EMPTY_VERSION).then_some(previous_version);
        let body = UpdateContentsRequest {
            message: &self.target.commit_message,
            content,
            sha,
            branch: self.target.branch.as_deref(),
        };

        let resp = self
            .request(reqwest::Method::PUT)
            .json(&body)
            .send()
            .await
            .context("Failed to send contents update to GitHub")?;

        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Ok(WriteOutcome::Conflict);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            // GitHub answers 422 when the sha is missing or does not match.
            if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY && message.contains("sha") {
                return Ok(WriteOutcome::Conflict);
            }
            return Err(PersistenceError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let updated: UpdateContentsResponse = resp
            .json()
            .await
            .context("Failed to parse contents update response from GitHub")?;
        info!(sha = %updated.content.sha, tasks = data.tasks.len(), "Committed task file to GitHub");
        Ok(WriteOutcome::Written {
            version: updated.content.sha,
        })
    }

    fn describe(&self) -> String {
        format!(
            "github:{}/{}/{}",
            self.target.owner, self.target.repo, self.target.path
        )
    }
}
