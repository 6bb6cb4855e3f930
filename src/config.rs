//! Board configuration, read from `.board/board.toml`.
//!
//! Layering is file → environment. A missing file yields defaults, so a
//! fresh checkout only needs `BOARD_PASSWORD` and `GITHUB_TOKEN` exported
//! (or placed in `.env`) plus the `[github]` coordinates.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! secure_cookies = false
//! dev_mode = false
//! refresh_secs = 30
//!
//! [auth]
//! token_ttl_hours = 24
//!
//! [storage]
//! backend = "github"   # github | file | memory
//!
//! [github]
//! owner = "springfield"
//! repo = "ops"
//! path = "tasks/queue.json"
//!
//! [file]
//! path = ".board/tasks.json"
//!
//! [[columns]]
//! id = "backlog"
//! title = "Backlog"
//! ```
//!
//! | Variable          | Overrides                         |
//! |-------------------|-----------------------------------|
//! | `BOARD_PASSWORD`  | `auth.password`                   |
//! | `GITHUB_TOKEN`    | `github.token`                    |
//! | `GITHUB_REPOSITORY` | `github.owner` + `github.repo`  |
//! | `BOARD_PORT`      | `server.port`                     |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::board::auth::AuthSettings;
use crate::board::columns::{ColumnRegistry, default_columns};
use crate::board::github::{
    GITHUB_API_URL, GithubRepository, GithubTarget, is_valid_github_token, parse_owner_repo,
};
use crate::board::models::{Column, TaskData};
use crate::board::persistence::{FileRepository, MemoryRepository, TaskRepository};
use crate::board::server::ServerConfig;

pub const DEFAULT_CONFIG_PATH: &str = ".board/board.toml";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Add `Secure` to the auth cookie; enable behind HTTPS.
    #[serde(default)]
    pub secure_cookies: bool,
    /// Permissive CORS for a UI served from another origin.
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_refresh_secs() -> u64 {
    30
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure_cookies: false,
            dev_mode: false,
            refresh_secs: default_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Prefer `BOARD_PASSWORD` over writing it here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u32,
}

fn default_token_ttl_hours() -> u32 {
    24
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            password: None,
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Github,
    File,
    /// Nothing survives a restart.
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Github => write!(f, "github"),
            StorageBackend::File => write!(f, "file"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(StorageBackend::Github),
            "file" => Ok(StorageBackend::File),
            "memory" => Ok(StorageBackend::Memory),
            _ => bail!(
                "Invalid storage backend '{}'. Valid values: github, file, memory",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubSection {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_github_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    /// Prefer `GITHUB_TOKEN` over writing it here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_github_path() -> String {
    "tasks/queue.json".to_string()
}

fn default_api_url() -> String {
    GITHUB_API_URL.to_string()
}

fn default_commit_message() -> String {
    "Update task queue from Kanban board".to_string()
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            path: default_github_path(),
            branch: None,
            api_url: default_api_url(),
            commit_message: default_commit_message(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSection {
    #[serde(default = "default_file_path")]
    pub path: PathBuf,
}

fn default_file_path() -> PathBuf {
    PathBuf::from(".board/tasks.json")
}

impl Default for FileSection {
    fn default() -> Self {
        Self {
            path: default_file_path(),
        }
    }
}

/// Top-level board configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub file: FileSection,
    #[serde(default = "default_columns")]
    pub columns: Vec<Column>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            auth: AuthSection::default(),
            storage: StorageSection::default(),
            github: GithubSection::default(),
            file: FileSection::default(),
            columns: default_columns(),
        }
    }
}

impl BoardConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse board.toml")
    }

    /// Returns default configuration if the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the file, then apply process environment overrides.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize board.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(password) = lookup("BOARD_PASSWORD").filter(|v| !v.is_empty()) {
            self.auth.password = Some(password);
        }
        if let Some(token) = lookup("GITHUB_TOKEN").filter(|v| !v.is_empty()) {
            self.github.token = Some(token);
        }
        if let Some(slug) = lookup("GITHUB_REPOSITORY").filter(|v| !v.is_empty()) {
            let (owner, repo) = parse_owner_repo(&slug)
                .with_context(|| format!("GITHUB_REPOSITORY '{}' is not owner/repo", slug))?;
            self.github.owner = owner;
            self.github.repo = repo;
        }
        if let Some(port) = lookup("BOARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("BOARD_PORT '{}' is not a valid port", port))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.auth.password.as_deref().unwrap_or("").is_empty() {
            warnings.push("No password configured: set BOARD_PASSWORD or auth.password".into());
        }
        if self.auth.token_ttl_hours == 0 {
            warnings.push("auth.token_ttl_hours is 0: every token expires immediately".into());
        }
        if let Err(e) = ColumnRegistry::new(self.columns.clone()) {
            warnings.push(format!("Invalid columns: {}", e));
        }

        if self.storage.backend == StorageBackend::Github {
            if self.github.owner.is_empty() || self.github.repo.is_empty() {
                warnings.push(
                    "github.owner and github.repo are required for the github backend".into(),
                );
            }
            if self.github.path.trim().is_empty() {
                warnings.push("github.path is empty".into());
            }
            match self.github.token.as_deref() {
                None | Some("") => {
                    warnings.push("No GitHub token: set GITHUB_TOKEN or github.token".into())
                }
                Some(token) if !is_valid_github_token(token) => warnings.push(
                    "GitHub token does not look like a GitHub token (expected ghp_/github_pat_/... prefix)"
                        .into(),
                ),
                Some(_) => {}
            }
        }

        warnings
    }

    pub fn column_registry(&self) -> Result<ColumnRegistry> {
        ColumnRegistry::new(self.columns.clone())
    }

    pub fn auth_settings(&self) -> AuthSettings {
        let mut auth = AuthSettings::new(
            self.auth.password.clone().unwrap_or_default(),
            self.auth.token_ttl_hours,
        );
        auth.secure_cookies = self.server.secure_cookies;
        auth
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            dev_mode: self.server.dev_mode,
            refresh_secs: self.server.refresh_secs,
        }
    }

    /// Construct the configured persistence backend.
    pub fn build_repository(&self) -> Result<Arc<dyn TaskRepository>> {
        match self.storage.backend {
            StorageBackend::Github => {
                if self.github.owner.is_empty() || self.github.repo.is_empty() {
                    bail!("github.owner and github.repo must be set for the github backend");
                }
                let token = self
                    .github
                    .token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .context("GITHUB_TOKEN is not set")?;
                Ok(Arc::new(GithubRepository::new(GithubTarget {
                    api_url: self.github.api_url.clone(),
                    owner: self.github.owner.clone(),
                    repo: self.github.repo.clone(),
                    path: self.github.path.clone(),
                    branch: self.github.branch.clone(),
                    token,
                    commit_message: self.github.commit_message.clone(),
                })))
            }
            StorageBackend::File => Ok(Arc::new(FileRepository::new(self.file.path.clone()))),
            StorageBackend::Memory => Ok(Arc::new(MemoryRepository::new(TaskData::default()))),
        }
    }

    /// Copy safe to print: secrets replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth.password.is_some() {
            copy.auth.password = Some(REDACTED.to_string());
        }
        if copy.github.token.is_some() {
            copy.github.token = Some(REDACTED.to_string());
        }
        copy
    }
}
