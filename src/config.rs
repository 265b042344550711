use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

use crate::ollama::DEFAULT_BASE_URL;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = Some(model.to_string());
        config.save()
    }

    /// Daemon URL: CLI flag, then `OLLAMA_HOST`, then the config file
    pub fn resolve_base_url(&self, cli_host: Option<&str>) -> String {
        let env_host = std::env::var("OLLAMA_HOST").ok();
        resolve_host(cli_host, env_host.as_deref(), self.base_url.as_deref())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(app_dir(dirs::config_dir())?.join("config.json"))
    }

    pub fn get_log_path() -> Result<PathBuf> {
        Ok(app_dir(dirs::data_local_dir())?.join("playground.log"))
    }
}

fn app_dir(base: Option<PathBuf>) -> Result<PathBuf> {
    let base = base.ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(base.join("ollama-playground"))
}

fn resolve_host(cli: Option<&str>, env: Option<&str>, file: Option<&str>) -> String {
    let host = cli
        .or(env)
        .or(file)
        .filter(|h| !h.trim().is_empty())
        .unwrap_or(DEFAULT_BASE_URL);

    // OLLAMA_HOST is commonly set without a scheme, e.g. "0.0.0.0:11434"
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            base_url: Some("http://gpu-box:11434".to_string()),
            default_model: Some("llama3.2:latest".to_string()),
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_host_precedence() {
        assert_eq!(
            resolve_host(Some("http://cli:1"), Some("http://env:2"), Some("http://file:3")),
            "http://cli:1"
        );
        assert_eq!(
            resolve_host(None, Some("http://env:2"), Some("http://file:3")),
            "http://env:2"
        );
        assert_eq!(resolve_host(None, None, Some("http://file:3/")), "http://file:3");
        assert_eq!(resolve_host(None, None, None), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_host_without_scheme() {
        assert_eq!(resolve_host(None, Some("0.0.0.0:11434"), None), "http://0.0.0.0:11434");
    }
}
