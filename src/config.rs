use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SECRETS_PATH: &str = "secrets.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required secret `{0}`")]
    MissingSecret(&'static str),
    #[error("Failed to read secrets file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid secrets file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Secrets and settings needed before the server can start.
///
/// The four secrets are required. Each one can come from the secrets file or
/// from an environment variable of the same name in upper case; the
/// environment wins.
#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub repo_name: String,
    pub gemini_api_key: String,
    pub admin_password: String,
    pub settings: Settings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Generative model used for the briefing
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Entries taken from each feed per run
    #[serde(default = "default_max_entries_per_feed")]
    pub max_entries_per_feed: usize,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_gemini_api_url")]
    pub gemini_api_url: String,
    /// Branch to read and commit to; the repository default when unset
    #[serde(default)]
    pub branch: Option<String>,
    /// Browser sessions idle longer than this are forgotten
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_model() -> String {
    "gemini-flash-latest".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_entries_per_feed() -> usize {
    5
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_gemini_api_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            bind_addr: default_bind_addr(),
            max_entries_per_feed: default_max_entries_per_feed(),
            github_api_url: default_github_api_url(),
            gemini_api_url: default_gemini_api_url(),
            branch: None,
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SecretsFile {
    github_token: Option<String>,
    repo_name: Option<String>,
    gemini_api_key: Option<String>,
    admin_pw: Option<String>,
    #[serde(default)]
    settings: Settings,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_sources(Some(content), |_| None)
    }

    /// Reads the secrets file if it exists and overlays the process environment.
    pub fn from_environment<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(content: Option<&str>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: SecretsFile = match content {
            Some(content) => toml::from_str(content)?,
            None => SecretsFile::default(),
        };

        let pick = |name: &'static str, from_file: Option<String>| {
            env(name)
                .or(from_file)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingSecret(name))
        };

        Ok(Self {
            github_token: pick("GITHUB_TOKEN", file.github_token)?,
            repo_name: pick("REPO_NAME", file.repo_name)?,
            gemini_api_key: pick("GEMINI_API_KEY", file.gemini_api_key)?,
            admin_password: pick("ADMIN_PW", file.admin_pw)?,
            settings: file.settings,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &"<redacted>")
            .field("repo_name", &self.repo_name)
            .field("gemini_api_key", &"<redacted>")
            .field("admin_password", &"<redacted>")
            .field("settings", &self.settings)
            .finish()
    }
}
