//! Connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to reach one database role.
///
/// Immutable once handed to a pool manager; reconfiguration replaces the
/// whole value, never mutates it in place. An empty `password` during
/// reconfiguration means "keep the previously stored credential" and is
/// resolved by the config store before this value reaches a manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Server hostname or address
    pub server: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Target database name
    pub database: String,
    /// SQL login username
    pub username: String,
    /// SQL login password
    pub password: String,
    /// Whether to require an encrypted channel to the server
    #[serde(default)]
    pub encrypt: bool,
    /// Timeout for establishing the TCP/TDS session, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for individual requests (probes, existence checks), in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_port() -> u16 {
    1433
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl ConnectionConfig {
    /// Create a configuration with default port and timeouts.
    pub fn new(server: &str, database: &str, username: &str, password: &str) -> Self {
        Self {
            server: server.to_string(),
            port: default_port(),
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            encrypt: false,
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same target, different database. Used for administrative operations
    /// that must run before the target database exists.
    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
