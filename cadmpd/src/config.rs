//! Daemon connection configuration.

use serde::Deserialize;

use cadplayer::{Error, Result};

/// The daemon's default concurrent-connection ceiling. Pool capacity must
/// stay strictly below it: once the ceiling is reached the daemon forcibly
/// closes connections, including ones we still use.
pub(crate) const DAEMON_CONNECTION_CEILING: usize = 10;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6600
}

fn default_pool_size() -> usize {
    6
}

/// Where and how to reach the daemon.
#[derive(Clone, Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    /// Number of pooled command connections, watcher excluded.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            host: default_host(),
            port: default_port(),
            password: None,
            pool_size: default_pool_size(),
        }
    }
}

impl DaemonConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        DaemonConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The watcher holds one extra connection, so the pool plus the watcher
    /// must fit under the daemon's ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::State("pool_size must be at least 1".to_string()));
        }
        if self.pool_size + 1 >= DAEMON_CONNECTION_CEILING {
            return Err(Error::State(format!(
                "pool_size {} leaves no headroom below the daemon's connection limit of {}",
                self.pool_size, DAEMON_CONNECTION_CEILING
            )));
        }
        Ok(())
    }
}
