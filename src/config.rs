//! Configuration for the livebuild agent.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TWEET_MAX_PER_HOUR, WATCHED_REPOS, ...)
//! 2. Config file (.livebuild/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .livebuild/config.yaml
//! - Relative paths in the config file are resolved against the directory
//!   containing `.livebuild/`
//!
//! Credentials are only read from the environment. A missing credential is a
//! startup error.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required env var: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to determine home directory")]
    NoHomeDir,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    /// Data directory for state and history
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub watched_repos: Vec<String>,
    pub claude_history_path: Option<String>,
    pub screenpipe_api_url: Option<String>,
    pub poll_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextConfig {
    pub window_minutes: Option<u64>,
    pub snapshot_interval_seconds: Option<u64>,
    pub prune_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishConfig {
    pub max_per_hour: Option<u32>,
    pub max_per_day: Option<u32>,
    pub min_interval_minutes: Option<u64>,
    pub dry_run: Option<bool>,
    pub decision_model: Option<String>,
    pub generation_model: Option<String>,
}

/// OAuth 1.0a user-context credentials for the X API
#[derive(Clone)]
pub struct TwitterCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl std::fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .finish_non_exhaustive()
    }
}

/// Settings for the Anthropic-backed oracles
#[derive(Clone)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub api_url: String,
    pub decision_model: String,
    pub generation_model: String,
}

impl std::fmt::Debug for AnthropicSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicSettings")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("decision_model", &self.decision_model)
            .field("generation_model", &self.generation_model)
            .finish()
    }
}

/// Publishing limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub min_interval_minutes: u64,
    pub dry_run: bool,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_per_hour: 3,
            max_per_day: 30,
            min_interval_minutes: 10,
            dry_run: false,
        }
    }
}

/// Fully resolved agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory for state.json, tweet-history.json and the lock file
    pub home: PathBuf,
    /// Repositories to watch for commits
    pub watched_repos: Vec<PathBuf>,
    /// Root of the assistant's history (contains `projects/`)
    pub claude_history_path: PathBuf,
    /// Base URL of the screen/audio capture API
    pub screenpipe_api_url: String,
    pub poll_interval: Duration,
    pub context_window_minutes: u64,
    pub snapshot_interval: Duration,
    pub prune_interval: Duration,
    pub publish: PublishSettings,
    pub anthropic: AnthropicSettings,
    /// Absent only in dry-run mode
    pub twitter: Option<TwitterCredentials>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl AgentConfig {
    /// Load configuration from the environment and the discovered config file
    pub fn load() -> Result<Self> {
        Self::load_with_dry_run(false)
    }

    /// Like [`AgentConfig::load`], with `force_dry_run` overriding `TWEET_DRY_RUN`.
    ///
    /// Forcing dry run drops the requirement for X credentials.
    pub fn load_with_dry_run(force_dry_run: bool) -> Result<Self> {
        let config_file = find_config_file();
        let file = match config_file {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };

        let home_dir = dirs::home_dir();
        let mut config = resolve(
            file.as_ref(),
            config_file.as_deref().and_then(project_root),
            home_dir.as_deref(),
            |key| {
                if force_dry_run && key == "TWEET_DRY_RUN" {
                    return Some("true".to_string());
                }
                std::env::var(key).ok()
            },
        )?;
        config.config_file = config_file;
        Ok(config)
    }

    pub fn context_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.context_window_minutes as i64)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".livebuild").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory containing `.livebuild/`
fn project_root(config_path: &Path) -> Option<PathBuf> {
    config_path
        .parent()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: Option<&Path>, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

/// Resolve only the data directory, without requiring credentials
pub fn livebuild_home() -> Result<PathBuf> {
    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };
    let base = config_file.as_deref().and_then(project_root);
    let home_dir = dirs::home_dir();
    let lookup = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

    Ok(resolve_home(
        file.as_ref(),
        base.as_deref(),
        home_dir.as_deref(),
        &lookup,
    )?)
}

fn resolve_home<F>(
    file: Option<&ConfigFile>,
    base: Option<&Path>,
    home_dir: Option<&Path>,
    get: &F,
) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = get("LIVEBUILD_HOME") {
        return Ok(PathBuf::from(v));
    }
    match file.and_then(|f| f.home.as_deref()) {
        Some(h) => Ok(resolve_path(base, h)),
        None => Ok(home_dir.ok_or(ConfigError::NoHomeDir)?.join(".livebuild")),
    }
}

/// Build the configuration from a config file and a variable lookup.
///
/// Pure apart from `lookup`, so tests can feed a map instead of the process
/// environment.
pub fn resolve<F>(
    file: Option<&ConfigFile>,
    base_dir: Option<PathBuf>,
    home_dir: Option<&Path>,
    lookup: F,
) -> Result<AgentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_file = ConfigFile::default();
    let file = file.unwrap_or(&default_file);
    let base = base_dir.as_deref();
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let home = resolve_home(Some(file), base, home_dir, &get)?;

    let watched_repos: Vec<PathBuf> = match get("WATCHED_REPOS") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect(),
        None => file
            .sources
            .watched_repos
            .iter()
            .map(|r| resolve_path(base, r))
            .collect(),
    };

    let claude_history_path = match get("CLAUDE_HISTORY_PATH") {
        Some(v) => PathBuf::from(v),
        None => match file.sources.claude_history_path {
            Some(ref p) => resolve_path(base, p),
            None => home_dir.ok_or(ConfigError::NoHomeDir)?.join(".claude"),
        },
    };

    let screenpipe_api_url = get("SCREENPIPE_API_URL")
        .or_else(|| file.sources.screenpipe_api_url.clone())
        .unwrap_or_else(|| "http://localhost:3030".to_string());

    let poll_interval_seconds = positive(
        "POLL_INTERVAL_SECONDS",
        parse_or(&get, "POLL_INTERVAL_SECONDS", file.sources.poll_interval_seconds, 30)?,
    )?;
    let context_window_minutes = positive(
        "CONTEXT_WINDOW_MINUTES",
        parse_or(&get, "CONTEXT_WINDOW_MINUTES", file.context.window_minutes, 15)?,
    )?;
    let snapshot_interval_seconds = positive(
        "SNAPSHOT_INTERVAL_SECONDS",
        parse_or(
            &get,
            "SNAPSHOT_INTERVAL_SECONDS",
            file.context.snapshot_interval_seconds,
            300,
        )?,
    )?;
    let prune_interval_seconds = positive(
        "PRUNE_INTERVAL_SECONDS",
        parse_or(
            &get,
            "PRUNE_INTERVAL_SECONDS",
            file.context.prune_interval_seconds,
            60,
        )?,
    )?;

    let defaults = PublishSettings::default();
    let publish = PublishSettings {
        max_per_hour: parse_or(
            &get,
            "TWEET_MAX_PER_HOUR",
            file.publish.max_per_hour,
            defaults.max_per_hour,
        )?,
        max_per_day: parse_or(
            &get,
            "TWEET_MAX_PER_DAY",
            file.publish.max_per_day,
            defaults.max_per_day,
        )?,
        min_interval_minutes: parse_or(
            &get,
            "TWEET_MIN_INTERVAL_MINUTES",
            file.publish.min_interval_minutes,
            defaults.min_interval_minutes,
        )?,
        dry_run: match get("TWEET_DRY_RUN") {
            Some(v) => parse_bool("TWEET_DRY_RUN", &v)?,
            None => file.publish.dry_run.unwrap_or(defaults.dry_run),
        },
    };

    let anthropic = AnthropicSettings {
        api_key: get("ANTHROPIC_API_KEY").ok_or(ConfigError::MissingVar("ANTHROPIC_API_KEY"))?,
        api_url: get("ANTHROPIC_API_URL")
            .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        decision_model: get("ANTHROPIC_DECISION_MODEL")
            .or_else(|| file.publish.decision_model.clone())
            .unwrap_or_else(|| "claude-haiku-4-5-20251001".to_string()),
        generation_model: get("ANTHROPIC_GENERATION_MODEL")
            .or_else(|| file.publish.generation_model.clone())
            .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
    };

    let twitter = if publish.dry_run {
        None
    } else {
        let required = |key: &'static str| get(key).ok_or(ConfigError::MissingVar(key));
        Some(TwitterCredentials {
            api_key: required("TWITTER_API_KEY")?,
            api_secret: required("TWITTER_API_SECRET")?,
            access_token: required("TWITTER_ACCESS_TOKEN")?,
            access_secret: required("TWITTER_ACCESS_SECRET")?,
        })
    };

    Ok(AgentConfig {
        home,
        watched_repos,
        claude_history_path,
        screenpipe_api_url,
        poll_interval: Duration::from_secs(poll_interval_seconds),
        context_window_minutes,
        snapshot_interval: Duration::from_secs(snapshot_interval_seconds),
        prune_interval: Duration::from_secs(prune_interval_seconds),
        publish,
        anthropic,
        twitter,
        config_file: None,
    })
}

fn parse_or<T, G>(get: &G, key: &'static str, file_value: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(file_value.unwrap_or(default)),
    }
}

fn positive(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Keep the first four characters of a secret
pub fn redact(secret: &str) -> String {
    let head: String = secret.chars().take(4).collect();
    format!("{}…", head)
}
