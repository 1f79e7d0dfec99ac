//! Service configuration.

use std::{
    fs,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CHATBRIDGE_CONFIG";

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path of the persisted JSON document.
    pub data_file: PathBuf,
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Upper bound on cached conversations.
    pub conversation_limit: usize,
    pub timers: TimerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 3000)),
            log_filter: "info".to_string(),
            conversation_limit: 100,
            timers: TimerConfig::default(),
        }
    }
}

/// Background timer cadences, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub reconnect_delay_ms: u64,
    pub conversation_refresh_ms: u64,
    pub activity_window_ms: u64,
    pub delivery_tick_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5_000,
            conversation_refresh_ms: 5 * 60_000,
            activity_window_ms: 10 * 60_000,
            delivery_tick_ms: 60_000,
        }
    }
}

impl TimerConfig {
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn conversation_refresh(&self) -> Duration {
        Duration::from_millis(self.conversation_refresh_ms)
    }

    #[must_use]
    pub const fn activity_window(&self) -> Duration {
        Duration::from_millis(self.activity_window_ms)
    }

    #[must_use]
    pub const fn delivery_tick(&self) -> Duration {
        Duration::from_millis(self.delivery_tick_ms)
    }

    /// Reject periods a repeating timer cannot run with.
    ///
    /// # Errors
    /// Returns error naming the first zero period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_tick_ms == 0 {
            return Err(ConfigError::ZeroPeriod("timers.delivery_tick_ms"));
        }
        if self.conversation_refresh_ms == 0 {
            return Err(ConfigError::ZeroPeriod("timers.conversation_refresh_ms"));
        }
        Ok(())
    }
}

fn default_data_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatbridge")
        .join("store.json")
}

/// Config error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
}

/// Load configuration from a TOML file.
///
/// # Errors
/// Returns error if the file cannot be read or parsed, or a timer period is zero.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: BridgeConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.timers.validate()?;
    Ok(config)
}

impl BridgeConfig {
    /// Load from the file named by `CHATBRIDGE_CONFIG`, or defaults if unset.
    ///
    /// # Errors
    /// Returns error if the variable is set but the file is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => load_config(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chatbridge.toml");
        fs::write(
            &path,
            r#"
data_file = "/var/lib/chatbridge/store.json"

[timers]
delivery_tick_ms = 1000
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.data_file, PathBuf::from("/var/lib/chatbridge/store.json"));
        assert_eq!(config.timers.delivery_tick(), Duration::from_secs(1));
        assert_eq!(config.timers.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.conversation_limit, 100);
        assert_eq!(config.listen_addr.port(), 3000);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_zero_timer_period_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zero.toml");
        fs::write(&path, "[timers]\ndelivery_tick_ms = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod("timers.delivery_tick_ms")));

        fs::write(&path, "[timers]\nconversation_refresh_ms = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPeriod("timers.conversation_refresh_ms")));

        // Zero reconnect delay is a valid immediate retry
        fs::write(&path, "[timers]\nreconnect_delay_ms = 0\n").unwrap();
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "timers = 3").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
