use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub claude_api_key: Option<String>,
    pub news_api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Only the first N articles of a batch go into a summarization prompt.
    #[serde(default = "default_summary_article_limit")]
    pub summary_article_limit: usize,

    #[serde(default = "default_max_article_chars")]
    pub max_article_chars: usize,

    /// Prior turns a backend session replays on each request.
    #[serde(default = "default_session_history_turns")]
    pub session_history_turns: usize,

    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_request_timeout() -> u64 {
    60
}

fn default_summary_article_limit() -> usize {
    10
}

fn default_max_article_chars() -> usize {
    10_000
}

fn default_session_history_turns() -> usize {
    20
}

fn default_country() -> String {
    "us".to_string()
}

fn default_page_size() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claude_api_key: None,
            news_api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            summary_article_limit: default_summary_article_limit(),
            max_article_chars: default_max_article_chars(),
            session_history_turns: default_session_history_turns(),
            country: default_country(),
            page_size: default_page_size(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Loads the config at `path`, writing defaults there first if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("news-digest")
            .join("config.toml")
    }
}
