//! Server configuration
//!
//! Layers, later ones winning: built-in defaults, an optional TOML file, `SHARP_*`
//! environment variables, then command-line flags (applied by the CLI).

use crate::storage::User;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default SHARP listener port; HTTP listens on the next one
pub const DEFAULT_SHARP_PORT: u16 = 5000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Inconsistent config: {0}")]
    Inconsistent(String),
}

/// Proof-of-work thresholds advertised on the health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashcashSettings {
    pub min_bits: u32,
    pub recommended_bits: u32,
}

impl Default for HashcashSettings {
    fn default() -> Self {
        Self {
            min_bits: crate::crypto::TRIVIAL_BITS,
            recommended_bits: crate::crypto::GOOD_BITS,
        }
    }
}

/// Background loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSettings {
    /// How often in-flight records are checked for staleness
    pub stale_interval_secs: u64,
    /// Age after which an in-flight record is considered orphaned
    pub stale_after_secs: u64,
    pub dispatch_interval_secs: u64,
    /// Scheduled records dispatched per tick
    pub batch_size: usize,
    pub expiry_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            stale_interval_secs: 10,
            stale_after_secs: 30,
            dispatch_interval_secs: 60,
            batch_size: 50,
            expiry_interval_secs: 60,
        }
    }
}

impl SchedulerSettings {
    pub fn stale_interval(&self) -> Duration {
        Duration::from_secs(self.stale_interval_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }
}

/// Mail host configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Domain this host serves, exactly as it appears after `#` in addresses
    pub domain: String,
    /// Interface both listeners bind to
    pub bind_host: String,
    pub sharp_port: u16,
    /// Defaults to `sharp_port + 1`
    pub http_port: Option<u16>,
    pub data_dir: PathBuf,
    pub delivery_timeout_secs: u64,
    /// Inbound connections silent this long between frames are dropped
    pub idle_timeout_secs: u64,
    pub hashcash: HashcashSettings,
    pub scheduler: SchedulerSettings,
    /// Local mailboxes
    pub users: Vec<User>,
    /// Bearer token -> address it may send as
    pub tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            bind_host: "0.0.0.0".to_string(),
            sharp_port: DEFAULT_SHARP_PORT,
            http_port: None,
            data_dir: PathBuf::from(".sharp_data"),
            delivery_timeout_secs: 10,
            idle_timeout_secs: 30,
            hashcash: HashcashSettings::default(),
            scheduler: SchedulerSettings::default(),
            users: Vec::new(),
            tokens: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Effective HTTP port
    pub fn http_port(&self) -> u16 {
        self.http_port
            .unwrap_or_else(|| self.sharp_port.saturating_add(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Cross-field checks a single key's parser cannot make
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A delivery still inside its deadline must never look orphaned
        if self.delivery_timeout_secs >= self.scheduler.stale_after_secs {
            return Err(ConfigError::Inconsistent(format!(
                "delivery_timeout_secs ({}) must be below scheduler.stale_after_secs ({})",
                self.delivery_timeout_secs, self.scheduler.stale_after_secs
            )));
        }
        Ok(())
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&s)
    }

    /// Apply `SHARP_*` overrides read through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(domain) = var("SHARP_DOMAIN") {
            self.domain = domain;
        }
        if let Some(port) = var("SHARP_PORT") {
            self.sharp_port = parse_port("SHARP_PORT", &port)?;
        }
        if let Some(port) = var("SHARP_HTTP_PORT") {
            self.http_port = Some(parse_port("SHARP_HTTP_PORT", &port)?);
        }
        if let Some(dir) = var("SHARP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Load config: defaults, then `path` (if given), then the process environment
pub fn load(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            log::info!("Loading config from {:?}", path);
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.sharp_port, 5000);
        assert_eq!(config.http_port(), 5001);
        assert_eq!(config.hashcash.min_bits, 5);
        assert_eq!(config.hashcash.recommended_bits, 18);
        assert_eq!(config.scheduler.batch_size, 50);
        assert_eq!(config.delivery_timeout(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            domain = "mail.example"
            sharp_port = 6000

            [scheduler]
            batch_size = 10

            [[users]]
            username = "bob"
            domain = "mail.example"

            [tokens]
            secret = "bob#mail.example"
            "#,
        )
        .unwrap();

        assert_eq!(config.domain, "mail.example");
        assert_eq!(config.http_port(), 6001);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.stale_after_secs, 30);
        assert_eq!(config.users, vec![User::new("bob", "mail.example")]);
        assert_eq!(config.tokens["secret"], "bob#mail.example");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            ServerConfig::from_toml("smtp_port = 25"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHARP_DOMAIN", "b.example"),
            ("SHARP_PORT", "7000"),
            ("SHARP_DATA_DIR", "/tmp/sharp"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.domain, "b.example");
        assert_eq!(config.sharp_port, 7000);
        assert_eq!(config.http_port(), 7001);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/sharp"));
    }

    #[test]
    fn test_invalid_env_port() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(|k| (k == "SHARP_HTTP_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharp.toml");
        std::fs::write(&path, "delivery_timeout_secs = 3\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.delivery_timeout(), Duration::from_secs(3));

        assert!(matches!(
            ServerConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_delivery_deadline_must_undercut_staleness() {
        assert!(ServerConfig::default().validate().is_ok());

        let config = ServerConfig::from_toml(
            r#"
            delivery_timeout_secs = 30

            [scheduler]
            stale_after_secs = 30
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sharp.toml");
        std::fs::write(&path, "delivery_timeout_secs = 45\n").unwrap();
        assert!(matches!(
            load(Some(path.as_path())),
            Err(ConfigError::Inconsistent(_))
        ));
    }
}
