use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub consumer_key: String,
    pub consumer_secret: String,
    /// OAuth access token, filled in by `--authorize`
    pub token: String,
    pub token_secret: String,
    pub preferences: Preferences,
    pub network: NetworkConfig,
}

/// Ranking and sync tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    /// Stop paging history once this many tracks have been scanned
    pub max_history: usize,
    /// Plays older than this many days are ignored when ranking
    pub max_age: u32,
    /// Number of top-ranked tracks to keep offline
    pub max_sync: usize,
    /// Drop cached history older than `max_age` after each sync
    pub prune_cache: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            max_history: 1000,
            max_age: 21,
            max_sync: 100,
            prune_cache: false,
        }
    }
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Endpoint for API method calls
    pub api_base: String,
    /// Base URL for the OAuth request/access token endpoints
    pub oauth_base: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient failures (0 disables retrying)
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.rdio.com/1/".to_string(),
            oauth_base: "https://api.rdio.com/oauth/".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Config {
    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("rotation");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the configuration to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        fs::create_dir_all(dir).context("Failed to create config directory")?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create temporary config file")?;
        tmp.write_all(contents.as_bytes())
            .context("Failed to write config file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush config file")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        Ok(())
    }

    /// Consumer credentials are needed before any remote call, including authorization.
    pub fn require_consumer(&self) -> Result<(), ConfigError> {
        if self.consumer_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("consumerKey"));
        }
        if self.consumer_secret.trim().is_empty() {
            return Err(ConfigError::MissingCredential("consumerSecret"));
        }
        Ok(())
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty() && !self.token_secret.is_empty()
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
