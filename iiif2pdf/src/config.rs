//! Ambient configuration (component-external, per SPEC_FULL.md §3.4): a
//! TOML-deserialised set of process-wide defaults, read once by the CLI
//! binary and otherwise irrelevant to the library, which takes all its
//! inputs as plain function arguments.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::error;

pub(crate) static CONFIG_PATH: OnceLock<PathBuf> = OnceLock::new();
pub(crate) static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub default_ppi: f64,
    pub default_concurrency: usize,
    pub default_max_retries: u32,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// On-disk cache for fetched bytes, reused between a `convert` and a
    /// preceding `estimate` run on the same manifest. `None` disables
    /// caching; fetches always go to the network.
    pub cache_dir: Option<String>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            default_ppi: 300.0,
            default_concurrency: 4,
            default_max_retries: 3,
            user_agent: concat!("iiif2pdf/", env!("CARGO_PKG_VERSION")).to_owned(),
            http_timeout_secs: 30,
            cache_dir: None,
        }
    }
}
impl Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Reads and parses the config file at `CONFIG_PATH`, logging (not
/// panicking on) any failure — an operator running without a config file
/// present gets the built-in defaults instead of a crash.
pub(crate) fn load_config() -> Option<Config> {
    let config_path = CONFIG_PATH.get().expect("CONFIG_PATH not set?!");
    let config_string = match std::fs::read_to_string(config_path) {
        Ok(cs) => cs,
        Err(e) => {
            error!("failed to read config from {}: {}", config_path.display(), e);
            return None;
        }
    };
    let config: Config = match toml::from_str(&config_string) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to parse config from {}: {}", config_path.display(), e);
            return None;
        }
    };
    Some(config)
}

/// Initialises the global config from `path`, falling back to built-in
/// defaults if the file is missing or malformed.
pub async fn init(path: PathBuf) {
    let _ = CONFIG_PATH.set(path);
    let config = load_config().unwrap_or_default();
    let _ = CONFIG.set(RwLock::new(config));
}

pub async fn current() -> Config {
    match CONFIG.get() {
        Some(lock) => lock.read().await.clone(),
        None => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.default_ppi, 300.0);
        assert_eq!(config.default_concurrency, 4);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.cache_dir, None);
    }

    #[test]
    fn deserializes_partial_toml_with_defaults_filled_in() {
        let config: Config = toml::from_str("default_ppi = 150.0\n").unwrap();
        assert_eq!(config.default_ppi, 150.0);
        assert_eq!(config.default_concurrency, 4);
    }
}
