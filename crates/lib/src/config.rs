//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.mindora/config.json`) and environment.

use crate::history::GroupingMode;
use crate::message::MessageKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Conversation defaults.
    #[serde(default)]
    pub chat: ChatConfig,

    /// History panel display and grouping.
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix. Overridden by MINDORA_API_BASE env.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Output kind requested when none is chosen ("text" or "image").
    #[serde(default)]
    pub default_kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// Characters of the user message shown per group (default 90).
    #[serde(default = "default_user_preview_chars")]
    pub user_preview_chars: usize,

    /// Characters of the AI reply shown per group (default 120).
    #[serde(default = "default_ai_preview_chars")]
    pub ai_preview_chars: usize,

    /// "closeOnReply" (default) or "overwriteReply".
    #[serde(default)]
    pub grouping: GroupingMode,
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

fn default_user_preview_chars() -> usize {
    90
}

fn default_ai_preview_chars() -> usize {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            user_preview_chars: default_user_preview_chars(),
            ai_preview_chars: default_ai_preview_chars(),
            grouping: GroupingMode::default(),
        }
    }
}

/// Resolve the API base URL: env MINDORA_API_BASE overrides config.
pub fn resolve_api_base(config: &Config) -> String {
    pick_api_base(std::env::var("MINDORA_API_BASE").ok(), config)
}

fn pick_api_base(env: Option<String>, config: &Config) -> String {
    env.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| config.api.base_url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("MINDORA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".mindora").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, else the default path (or MINDORA_CONFIG_PATH).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.api.base_url, "http://localhost:5000/api");
        assert_eq!(c.chat.default_kind, MessageKind::Text);
        assert_eq!(c.history.user_preview_chars, 90);
        assert_eq!(c.history.ai_preview_chars, 120);
        assert_eq!(c.history.grouping, GroupingMode::CloseOnReply);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let c: Config = serde_json::from_str(
            r#"{
                "chat": { "defaultKind": "image" },
                "history": { "grouping": "overwriteReply" }
            }"#,
        )
        .expect("parse");
        assert_eq!(c.chat.default_kind, MessageKind::Image);
        assert_eq!(c.history.grouping, GroupingMode::OverwriteReply);
        assert_eq!(c.history.ai_preview_chars, 120);
        assert_eq!(c.api.base_url, "http://localhost:5000/api");
    }

    #[test]
    fn env_base_overrides_config() {
        let mut c = Config::default();
        c.api.base_url = "http://files/api".to_string();
        assert_eq!(pick_api_base(None, &c), "http://files/api");
        assert_eq!(pick_api_base(Some("  ".into()), &c), "http://files/api");
        assert_eq!(
            pick_api_base(Some("https://chat.example.com/api".into()), &c),
            "https://chat.example.com/api"
        );
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir()
            .join(format!("mindora-missing-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).expect("load");
        assert_eq!(used, path);
        assert_eq!(config.api.base_url, "http://localhost:5000/api");
    }
}
