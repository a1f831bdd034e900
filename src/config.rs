//! Configuration loaded from `~/.geoloc/config.toml`.
//!
//! Every section has defaults, so an absent file (or section) is fine.
//! Provider credentials fall back to environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::location::policy::{
    EvictionPolicy, ValidityPolicy, EVICTION_FRACTION, MAX_AGE_DAYS, MAX_ENTRIES,
    UNUSED_THRESHOLD_DAYS,
};
use crate::rate_gate::{RateGate, RateGateConfig};

pub const GOOGLE_KEY_ENV: &str = "GOOGLE_MAPS_API_KEY";
pub const LOCATIONIQ_KEY_ENV: &str = "LOCATIONIQ_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".geoloc")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub geocode_gate: GateConfig,
    pub api_gate: GateConfig,
    pub providers: ProvidersConfig,
    pub batch: BatchConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            geocode_gate: GateConfig::default(),
            api_gate: GateConfig::public_default(),
            providers: ProvidersConfig::default(),
            batch: BatchConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        data_dir().join("config.toml")
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load_from_path(p)?,
            None => {
                let p = Self::default_path();
                if p.exists() {
                    Self::load_from_path(&p)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Fill unset credentials from the environment.
    pub fn apply_env(&mut self) {
        if self.providers.google_api_key.as_deref().map_or(true, str::is_empty) {
            self.providers.google_api_key = std::env::var(GOOGLE_KEY_ENV).ok();
        }
        if self.providers.locationiq_api_key.as_deref().map_or(true, str::is_empty) {
            self.providers.locationiq_api_key = std::env::var(LOCATIONIQ_KEY_ENV).ok();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub max_entries: u64,
    pub max_age_days: i64,
    pub unused_threshold_days: i64,
    pub eviction_fraction: f64,
    /// Window for the "recent entries" stat.
    pub recent_window_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("cache.db"),
            max_entries: MAX_ENTRIES,
            max_age_days: MAX_AGE_DAYS,
            unused_threshold_days: UNUSED_THRESHOLD_DAYS,
            eviction_fraction: EVICTION_FRACTION,
            recent_window_hours: 24,
        }
    }
}

impl CacheConfig {
    pub fn validity(&self) -> ValidityPolicy {
        ValidityPolicy::new(
            chrono::Duration::days(self.max_age_days),
            chrono::Duration::days(self.unused_threshold_days),
        )
    }

    pub fn eviction(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.max_entries, self.eviction_fraction)
    }

    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recent_window_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub window_secs: u64,
    pub max_calls: u32,
    pub min_delay_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_calls: 50,
            min_delay_ms: 200,
        }
    }
}

impl GateConfig {
    /// The stricter default budget for public API traffic.
    pub fn public_default() -> Self {
        Self {
            window_secs: 60,
            max_calls: 30,
            min_delay_ms: 0,
        }
    }

    pub fn to_gate(&self, name: &str) -> RateGate {
        RateGate::new(
            name,
            RateGateConfig {
                window: Duration::from_secs(self.window_secs),
                max_calls: self.max_calls,
                min_delay: Duration::from_millis(self.min_delay_ms),
            },
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Fallback order, highest priority first.
    pub order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locationiq_api_key: Option<String>,
    pub nominatim_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// ISO 3166-1 alpha-2 bias passed to providers that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: vec![
                "google".into(),
                "locationiq".into(),
                "nominatim".into(),
                "builtin".into(),
            ],
            google_api_key: None,
            locationiq_api_key: None,
            nominatim_url: crate::location::providers::NOMINATIM_URL.into(),
            user_agent: format!("geoloc/{} (incident-geocoder)", env!("CARGO_PKG_VERSION")),
            timeout_secs: 15,
            region: Some("id".into()),
        }
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub group_size: usize,
    pub group_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_size: 5,
            group_delay_ms: 100,
        }
    }
}

impl BatchConfig {
    pub fn group_delay(&self) -> Duration {
        Duration::from_millis(self.group_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.max_age_days, 30);
        assert_eq!(config.cache.unused_threshold_days, 7);
        assert_eq!(config.batch.group_size, 5);
        assert_eq!(config.providers.order.len(), 4);
        assert_eq!(config.cache.eviction().batch_size(), 2_000);
        assert!(config.api_gate.max_calls < config.geocode_gate.max_calls);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [cache]
            max_entries = 500

            [geocode_gate]
            max_calls = 10

            [providers]
            order = ["nominatim", "builtin"]
            google_api_key = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.cache.max_age_days, 30);
        assert_eq!(config.geocode_gate.max_calls, 10);
        assert_eq!(config.geocode_gate.window_secs, 60);
        assert_eq!(config.providers.order, vec!["nominatim", "builtin"]);
        assert_eq!(config.providers.google_api_key.as_deref(), Some("abc"));
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn test_gate_from_config() {
        let gate = GateConfig {
            window_secs: 30,
            max_calls: 5,
            min_delay_ms: 250,
        }
        .to_gate("geocode");
        assert_eq!(gate.name(), "geocode");
        assert_eq!(gate.config().window, Duration::from_secs(30));
        assert_eq!(gate.config().min_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_load_explicit_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nmax_entries = ").unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[batch]\ngroup_size = 3\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.batch.group_size, 3);
        assert_eq!(config.batch.group_delay(), Duration::from_millis(100));
    }
}
