use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use std::time::Duration;
use anyhow::{Context, Result};
use log::info;

use crate::error::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const API_KEY_ENV: &str = "BIRDEYE_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub favorites: FavoritesConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub birdeye_base_url: String,
    pub birdeye_api_key: Option<String>,
    pub dexscreener_base_url: String,
    pub request_timeout_secs: u64,
    pub min_request_interval_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            birdeye_base_url: "https://public-api.birdeye.so".to_string(),
            birdeye_api_key: None,
            dexscreener_base_url: "https://api.dexscreener.com".to_string(),
            request_timeout_secs: 10,
            min_request_interval_ms: 250,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub stale_time_secs: u64,
    pub refetch_interval_secs: u64,
    pub history_stale_time_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub fetch_timeout_secs: u64,
    pub poll_tick_ms: u64,
    /// Unobserved entries idle this long are dropped.
    pub gc_time_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_secs: 30,
            refetch_interval_secs: 60,
            history_stale_time_secs: 300,
            max_attempts: 3,
            retry_delay_ms: 1000,
            fetch_timeout_secs: 15,
            poll_tick_ms: 1000,
            gc_time_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FavoritesConfig {
    pub path: PathBuf,
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/favorites.json"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub default_limit: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Missing file means defaults; a present but invalid file is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        info!("No configuration at {}, using defaults", path.display());
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, config_str)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api.birdeye_api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        let cache = &self.cache;
        if cache.stale_time_secs == 0 {
            return Err(Error::ConfigError("cache.stale_time_secs must be positive".into()));
        }
        if cache.refetch_interval_secs < cache.stale_time_secs {
            return Err(Error::ConfigError(
                "cache.refetch_interval_secs must not be shorter than cache.stale_time_secs".into(),
            ));
        }
        if cache.max_attempts == 0 {
            return Err(Error::ConfigError("cache.max_attempts must be at least 1".into()));
        }
        if cache.fetch_timeout_secs == 0 || cache.poll_tick_ms == 0 {
            return Err(Error::ConfigError("cache timeouts and poll tick must be positive".into()));
        }
        if !(1..=500).contains(&self.display.default_limit) {
            return Err(Error::ConfigError("display.default_limit must be within 1..=500".into()));
        }
        Ok(())
    }
}
