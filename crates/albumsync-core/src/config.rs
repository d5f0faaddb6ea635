//! Application configuration management.
//!
//! Holds the backend origins, which one is active, and the media size
//! ceilings enforced before upload. Configuration is stored at
//! `~/.config/albumsync/config.json` and may be overridden from the
//! environment (the binary loads `.env` first).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "albumsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL_DEV: &str = "http://localhost:5000";
const DEFAULT_API_BASE_URL_PROD: &str = "https://api.albumsync.app";

pub const DEFAULT_MAX_IMAGE_SIZE_MB: u64 = 15;
pub const DEFAULT_MAX_VIDEO_SIZE_MB: u64 = 50;

/// Which backend deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Mode::Development),
            "production" | "prod" => Some(Mode::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub api_base_url_dev: String,
    pub api_base_url_prod: String,
    pub max_image_size_mb: u64,
    pub max_video_size_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            api_base_url_dev: DEFAULT_API_BASE_URL_DEV.to_string(),
            api_base_url_prod: DEFAULT_API_BASE_URL_PROD.to_string(),
            max_image_size_mb: DEFAULT_MAX_IMAGE_SIZE_MB,
            max_video_size_mb: DEFAULT_MAX_VIDEO_SIZE_MB,
        }
    }
}

impl Config {
    /// Load from the config file (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply `ALBUMSYNC_MODE`, `API_BASE_URL_DEV`, `API_BASE_URL_PROD`,
    /// `ALBUMSYNC_MAX_IMAGE_MB` and `ALBUMSYNC_MAX_VIDEO_MB`.
    /// Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = var("ALBUMSYNC_MODE").as_deref().and_then(Mode::parse) {
            self.mode = mode;
        }
        if let Some(url) = var("API_BASE_URL_DEV").filter(|u| !u.trim().is_empty()) {
            self.api_base_url_dev = url;
        }
        if let Some(url) = var("API_BASE_URL_PROD").filter(|u| !u.trim().is_empty()) {
            self.api_base_url_prod = url;
        }
        if let Some(mb) = var("ALBUMSYNC_MAX_IMAGE_MB").and_then(|v| v.trim().parse().ok()) {
            self.max_image_size_mb = mb;
        }
        if let Some(mb) = var("ALBUMSYNC_MAX_VIDEO_MB").and_then(|v| v.trim().parse().ok()) {
            self.max_video_size_mb = mb;
        }
    }

    /// Backend origin for the active mode, without a trailing slash.
    pub fn base_url(&self) -> &str {
        let url = match self.mode {
            Mode::Development => &self.api_base_url_dev,
            Mode::Production => &self.api_base_url_prod,
        };
        url.trim_end_matches('/')
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Per-user cache directory. Depends only on the platform, not on any loaded setting.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
