//! Initialize the configuration directory: create ~/.mindora and a default config.json.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the config directory and write the default config if it does not exist.
/// An existing config file is left untouched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;

    #[test]
    fn writes_loadable_defaults_once() {
        let dir = std::env::temp_dir().join(format!("mindora-init-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let created = init_config_dir(&path).expect("init");
        assert_eq!(created, dir);
        let (config, _) = load_config(Some(path.clone())).expect("load");
        assert_eq!(config.history.user_preview_chars, 90);

        std::fs::write(&path, r#"{ "api": { "baseUrl": "http://custom/api" } }"#).expect("write");
        init_config_dir(&path).expect("re-init");
        let (config, _) = load_config(Some(path)).expect("load");
        assert_eq!(config.api.base_url, "http://custom/api");

        let _ = std::fs::remove_dir_all(dir);
    }
}
