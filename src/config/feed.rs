// src/config/feed.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const ENV_CONFIG_PATH: &str = "PARTYGRAM_CONFIG_PATH";
pub const ENV_API_KEY: &str = "PARTYGRAM_API_KEY";
pub const DEFAULT_CONFIG_PATH: &str = "config/feed.toml";

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_STORY_WINDOW_SECS: u64 = 24 * 3600;

fn default_backend_url() -> String {
    "http://127.0.0.1:54321".to_string()
}
fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}
fn default_story_window_secs() -> u64 {
    DEFAULT_STORY_WINDOW_SECS
}
fn default_overlay_path() -> PathBuf {
    PathBuf::from("state/overlay")
}
fn default_chat_poll_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u8 {
    3
}
fn default_bind_addr() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// "ENV" means: read from PARTYGRAM_API_KEY.
    #[serde(default)]
    pub api_key: String,
    /// Session bearer token; falls back to `api_key` when absent.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Viewing user; likes are keyed by `(post_id, user_id)`.
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_story_window_secs")]
    pub story_window_secs: u64,
    /// Directory of the local key-value store (overlay, favorites, prefs).
    #[serde(default = "default_overlay_path")]
    pub overlay_path: PathBuf,
    #[serde(default = "default_chat_poll_secs")]
    pub chat_poll_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: String::new(),
            access_token: None,
            user_id: String::new(),
            page_size: default_page_size(),
            story_window_secs: default_story_window_secs(),
            overlay_path: default_overlay_path(),
            chat_poll_secs: default_chat_poll_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl FeedConfig {
    /// Load from an explicit TOML file, then resolve and sanitize.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed config from {}", path.display()))?;
        let cfg: FeedConfig = toml::from_str(&content)
            .with_context(|| format!("parsing feed config {}", path.display()))?;
        cfg.resolved()
    }

    /// Load using env var + fallbacks:
    /// 1) $PARTYGRAM_CONFIG_PATH
    /// 2) config/feed.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        Self::default().resolved()
    }

    fn resolved(mut self) -> Result<Self> {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key =
                env::var(ENV_API_KEY).map_err(|_| anyhow!("Missing {ENV_API_KEY} env var"))?;
        }
        self.backend_url = self.backend_url.trim_end_matches('/').to_string();

        if self.page_size == 0 || self.page_size > 100 {
            self.page_size = default_page_size();
        }
        if self.story_window_secs == 0 {
            self.story_window_secs = default_story_window_secs();
        }
        if self.chat_poll_secs == 0 {
            self.chat_poll_secs = default_chat_poll_secs();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        Ok(self)
    }

    pub fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}
