//! Application configuration: TOML file, then environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::downloader::models::NetworkConfig;

pub const ENV_BOT_API_URL: &str = "MEDIA_RELAY_BOT_API_URL";
pub const ENV_SOCKS5_PROXY: &str = "MEDIA_RELAY_SOCKS5_PROXY";
pub const ENV_LOG_LEVEL: &str = "MEDIA_RELAY_LOG_LEVEL";
pub const ENV_CACHE_PATH: &str = "MEDIA_RELAY_CACHE_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// SOCKS5/HTTP proxy for yt-dlp and stream transfers
    pub proxy: Option<String>,
    pub timeout_secs: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Values for chats that never changed their settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatDefaults {
    pub auto_resolve_media: bool,
    pub show_caption: bool,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            auto_resolve_media: true,
            show_caption: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Prefix for uploaded file names
    pub bot_name: String,
    /// Self-hosted bot API endpoint; raises the upload ceiling when set
    pub bot_api_url: Option<String>,
    pub network: NetworkSection,
    pub cache_path: Option<PathBuf>,
    /// Directory the console host writes uploads to
    pub spool_dir: Option<PathBuf>,
    pub log: LogSection,
    pub defaults: ChatDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_name: "MediaRelay".to_string(),
            bot_api_url: None,
            network: NetworkSection::default(),
            cache_path: None,
            spool_dir: None,
            log: LogSection::default(),
            defaults: ChatDefaults::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` if it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from `lookup` (the process environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v: &String| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_BOT_API_URL) {
            self.bot_api_url = Some(url);
        }
        if let Some(proxy) = non_empty(ENV_SOCKS5_PROXY) {
            self.network.proxy = Some(proxy);
        }
        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log.level = level;
        }
        if let Some(path) = non_empty(ENV_CACHE_PATH) {
            self.cache_path = Some(PathBuf::from(path));
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            proxy: self.network.proxy.clone(),
            timeout: Some(self.network.timeout_secs),
        }
    }

    /// Configured cache file, else `<data dir>/media-relay/cache.json`.
    pub fn cache_file(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("media-relay")
                .join("cache.json")
        })
    }

    pub fn spool_directory(&self) -> PathBuf {
        self.spool_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("media-relay-spool"))
    }

    pub fn admission_limit(&self) -> AdmissionLimit {
        AdmissionLimit::from_config(self)
    }
}

/// Largest upload the active transport accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimit(u64);

impl AdmissionLimit {
    /// Ceiling of a self-hosted bot API server.
    pub const SELF_HOSTED: Self = Self(1_572_864_000);
    /// Ceiling of the default hosted API.
    pub const HOSTED: Self = Self(50 * 1024 * 1024);

    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.bot_api_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Self::SELF_HOSTED,
            _ => Self::HOSTED,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn admits(&self, size_bytes: u64) -> bool {
        size_bytes <= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        config.apply_env(|_| None);
        assert_eq!(config.network.timeout_secs, 120);
        assert!(config.defaults.auto_resolve_media);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "bot_name = \"Eleine\"\n[network]\nproxy = \"socks5://127.0.0.1:1080\"\n[defaults]\nshow_caption = false\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.bot_name, "Eleine");
        assert_eq!(config.network.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(config.network.timeout_secs, 120);
        assert!(!config.defaults.show_caption);
        assert!(config.defaults.auto_resolve_media);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bot_name = [").unwrap();
        assert!(matches!(AppConfig::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides_and_admission_limit() {
        let mut config = AppConfig::default();
        assert_eq!(config.admission_limit(), AdmissionLimit::HOSTED);

        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_BOT_API_URL, "http://localhost:8081"),
            (ENV_LOG_LEVEL, "debug"),
            (ENV_SOCKS5_PROXY, ""),
        ]);
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.network.proxy, None);
        assert_eq!(config.admission_limit().bytes(), 1_572_864_000);
        assert!(AdmissionLimit::HOSTED.admits(50 * 1024 * 1024));
        assert!(!AdmissionLimit::HOSTED.admits(50 * 1024 * 1024 + 1));
    }
}
