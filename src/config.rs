//! Configuration loading.
//!
//! Options start from built-in defaults, are optionally replaced by a TOML
//! file (`--config <path>`) and finally overridden by environment
//! variables under the `RELAYKV_` prefix with dots replaced by
//! underscores, e.g. `nats.url` becomes `RELAYKV_NATS_URL`.
//!
//! ```toml
//! [nats]
//! url = "nats://localhost:4222"
//! bucket_prefix = "relaykv"
//! timeout_secs = 10
//! persist = false
//!
//! [server]
//! address = ":6379"
//! num_databases = 16
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backend connection settings.
    #[serde(default)]
    pub nats: NatsConfig,

    /// RESP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// NATS backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// Connection string for the NATS server.
    #[serde(default = "default_url")]
    pub url: String,

    /// Prefix for primary and expiration bucket names.
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Per-command deadline applied to every backend call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Keep bucket contents across restarts. When false the buckets are
    /// deleted and re-created at startup.
    #[serde(default)]
    pub persist: bool,
}

/// RESP endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP bind address.
    #[serde(default = "default_address")]
    pub address: String,

    /// Number of databases in the storage pool.
    #[serde(default = "default_num_databases")]
    pub num_databases: usize,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_bucket_prefix() -> String {
    "relaykv".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_address() -> String {
    ":6379".to_string()
}

fn default_num_databases() -> usize {
    16
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            bucket_prefix: default_bucket_prefix(),
            timeout_secs: default_timeout_secs(),
            persist: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            num_databases: default_num_databases(),
        }
    }
}

impl Config {
    /// Loads configuration from an optional TOML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env();

        if config.server.num_databases == 0 {
            anyhow::bail!("server.num_databases must be at least 1");
        }

        Ok(config)
    }

    /// The backend timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.nats.timeout_secs)
    }

    /// The listen address, with a bare `:port` expanded to all interfaces.
    pub fn listen_address(&self) -> String {
        match self.server.address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.server.address.clone(),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("RELAYKV_NATS_URL") {
            self.nats.url = value;
        }
        if let Ok(value) = env::var("RELAYKV_NATS_BUCKET_PREFIX") {
            self.nats.bucket_prefix = value;
        }
        if let Ok(value) = env::var("RELAYKV_NATS_TIMEOUT") {
            if let Ok(secs) = value.parse() {
                self.nats.timeout_secs = secs;
            }
        }
        if let Ok(value) = env::var("RELAYKV_NATS_PERSIST") {
            if let Ok(persist) = value.parse() {
                self.nats.persist = persist;
            }
        }
        if let Ok(value) = env::var("RELAYKV_SERVER_ADDRESS") {
            self.server.address = value;
        }
        if let Ok(value) = env::var("RELAYKV_SERVER_NUM_DATABASES") {
            if let Ok(count) = value.parse() {
                self.server.num_databases = count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.bucket_prefix, "relaykv");
        assert_eq!(config.nats.timeout_secs, 10);
        assert!(!config.nats.persist);
        assert_eq!(config.server.address, ":6379");
        assert_eq!(config.server.num_databases, 16);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [nats]
            url = "nats://example:4222"

            [server]
            num_databases = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.nats.url, "nats://example:4222");
        assert_eq!(config.nats.bucket_prefix, "relaykv");
        assert_eq!(config.server.num_databases, 4);
        assert_eq!(config.server.address, ":6379");
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.num_databases, 16);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn listen_address_expands_bare_ports() {
        let mut config = Config::default();
        assert_eq!(config.listen_address(), "0.0.0.0:6379");

        config.server.address = "127.0.0.1:7000".to_string();
        assert_eq!(config.listen_address(), "127.0.0.1:7000");
    }

    #[test]
    fn environment_overrides() {
        env::set_var("RELAYKV_NATS_URL", "nats://elsewhere:4222");
        env::set_var("RELAYKV_SERVER_NUM_DATABASES", "3");
        env::set_var("RELAYKV_NATS_PERSIST", "true");

        let mut config = Config::default();
        config.apply_env();

        env::remove_var("RELAYKV_NATS_URL");
        env::remove_var("RELAYKV_SERVER_NUM_DATABASES");
        env::remove_var("RELAYKV_NATS_PERSIST");

        assert_eq!(config.nats.url, "nats://elsewhere:4222");
        assert_eq!(config.server.num_databases, 3);
        assert!(config.nats.persist);
    }
}
