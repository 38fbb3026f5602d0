use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api/";
pub const DEFAULT_API_PREFIX: &str = "/api";

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_logout_timeout_ms")]
    pub logout_timeout_ms: u64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_logout_timeout_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: default_api_base(),
            api_prefix: default_api_prefix(),
            http_proxy: String::new(),
            https_proxy: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            logout_timeout_ms: default_logout_timeout_ms(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Loads ~/.food_delivery/config.json, then ./config.toml, then applies
    /// environment overrides.
    pub fn load() -> Self {
        let mut config = Config::default();

        let mut loaded = false;
        let json_path = paths::config_json_path();
        if json_path.exists() {
            match std::fs::read_to_string(&json_path) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(file_config) => {
                        config = file_config;
                        loaded = true;
                    }
                    Err(e) => log::warn!("Ignoring malformed {}: {}", json_path.display(), e),
                },
                Err(e) => log::warn!("Failed to read {}: {}", json_path.display(), e),
            }
        }

        if !loaded && Path::new(CONFIG_FILE_PATH).exists() {
            if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_PATH) {
                match toml::from_str::<Config>(&content) {
                    Ok(file_config) => config = file_config,
                    Err(e) => log::warn!("Ignoring malformed {}: {}", CONFIG_FILE_PATH, e),
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = var("API_BASE") {
            self.api_base = api_base;
        }
        if let Some(http_proxy) = var("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = var("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(dir) = var("DELIVERY_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = var("DELIVERY_REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(ms) = var("DELIVERY_LOGOUT_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
            self.logout_timeout_ms = ms;
        }
    }

    /// Config pointing at an arbitrary backend, used by tests and the CLI.
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Config {
            api_base: api_base.into(),
            ..Config::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(paths::app_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("API_BASE", "http://10.0.2.2:8000/api/"),
            ("DELIVERY_LOGOUT_TIMEOUT_MS", "500"),
            ("DELIVERY_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base, "http://10.0.2.2:8000/api/");
        assert_eq!(config.logout_timeout(), Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config: Config = toml::from_str(r#"api_base = "http://192.168.1.80:8000/api/""#)
            .expect("parse toml");
        assert_eq!(config.api_base, "http://192.168.1.80:8000/api/");
        assert_eq!(config.api_prefix, DEFAULT_API_PREFIX);
        assert_eq!(config.logout_timeout_ms, 3000);
        assert!(config.data_dir.is_none());
    }
}
