//! OllamaChat configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the backend base URL
pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

/// Main OllamaChat configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inference backend configuration
    pub backend: BackendConfig,

    /// Session defaults
    pub session: SessionConfig,

    /// Transcript persistence
    pub transcript: TranscriptConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.effective_base_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(eyre::eyre!("Backend base URL must start with http:// or https://, got '{}'", url));
        }
        if self.backend.model.trim().is_empty() {
            return Err(eyre::eyre!("Backend model must not be empty"));
        }
        if self.session.user_id.trim().is_empty() {
            return Err(eyre::eyre!("Session user-id must not be empty"));
        }
        if self.session.channel_capacity == 0 {
            return Err(eyre::eyre!("Session channel-capacity must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ollamachat.yml
        let local_config = PathBuf::from(".ollamachat.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ollamachat/ollamachat.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ollamachat").join("ollamachat.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Inference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Ollama base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Model identifier sent with every prompt
    pub model: String,

    /// Total request timeout in milliseconds, including the streamed body
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3:8b".to_string(),
            timeout_ms: 300_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl BackendConfig {
    /// Base URL after applying the `OLLAMA_BASE_URL` override, without trailing slash
    pub fn effective_base_url(&self) -> String {
        let url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.base_url.clone());
        url.trim_end_matches('/').to_string()
    }
}

/// Session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// User identifier forwarded with every prompt
    #[serde(rename = "user-id")]
    pub user_id: String,

    /// Capacity of each notification feed
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            channel_capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Transcript persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Append committed messages to disk
    pub enabled: bool,

    /// Directory holding one JSONL file per user
    pub dir: PathBuf,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/ollamachat on Linux)
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ollamachat")
            .join("transcripts");

        Self { enabled: true, dir }
    }
}
