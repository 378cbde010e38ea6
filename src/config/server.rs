//! Server configuration for orchestrator-server
//!
//! Loads `orchestrator-server.toml`: database/bus connection strings, the
//! router-expression sandbox limits, the share-link secret, and the worker
//! verbosity pass-through. Every field has an environment variable override,
//! checked first, mirroring how this crate treats env vars as the
//! deployment-time authority over the checked-in file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(std::io::Error),
    #[error("failed to parse TOML: {0}")]
    ParseError(toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Alias used by the crate-wide error conversion; server config errors are
/// validation-class (a malformed deployment file), not infrastructure.
pub type ConfigError = ServerConfigError;

fn default_server_name() -> String {
    "flowctl-orchestrator".to_string()
}

fn default_pool_size() -> u32 {
    20
}

fn default_js_memory_limit_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_js_timeout_ms() -> u64 {
    50
}

fn default_share_token_ttl_secs() -> u64 {
    604_800
}

/// Server identification, surfaced nowhere except logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
        }
    }
}

/// Relational store configuration. Backs the externally-specified Postgres
/// store with a concrete, testable SQLite target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Durable message-bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub redis_url: String,
}

/// Router-expression sandbox limits (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_js_memory_limit_bytes")]
    pub js_memory_limit_bytes: u64,
    #[serde(default = "default_js_timeout_ms")]
    pub js_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            js_memory_limit_bytes: default_js_memory_limit_bytes(),
            js_timeout_ms: default_js_timeout_ms(),
        }
    }
}

/// Share-link issuance configuration, referenced by the (externally owned)
/// share convenience endpoints but whose secret/TTL this crate still
/// provisions since the kill-switch counter lives on `Workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default)]
    pub token_secret: Option<String>,
    #[serde(default = "default_share_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_ttl_secs: default_share_token_ttl_secs(),
        }
    }
}

/// Pure pass-through, surfaced on `GET /workers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub verbose: bool,
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerInfoConfig,
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl ServerConfig {
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ServerConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ServerConfigError::ReadError)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, ServerConfigError> {
        toml::from_str(content).map_err(ServerConfigError::ParseError)
    }

    /// Load from `CONFIG_PATH`, common file locations, or defaults overlaid
    /// with environment variables per §6.3.
    pub fn load() -> Result<Self, ServerConfigError> {
        let mut config = if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            Self::from_file(config_path)?
        } else {
            let candidates = [
                PathBuf::from("config/orchestrator-server.toml"),
                PathBuf::from("../config/orchestrator-server.toml"),
                PathBuf::from("./orchestrator-server.toml"),
            ];
            match candidates.iter().find(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::defaults(),
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn defaults() -> Self {
        Self {
            server: ServerInfoConfig::default(),
            database: DatabaseConfig {
                path: "orchestrator.db".to_string(),
                pool_size: default_pool_size(),
            },
            bus: BusConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
            },
            sandbox: SandboxConfig::default(),
            share: ShareConfig::default(),
            worker: WorkerConfig::default(),
        }
    }

    /// Environment variables always override file values (§6.3).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.path = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.bus.redis_url = v;
        }
        if let Ok(v) = std::env::var("DB_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.database.pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("JS_MEMORY_LIMIT") {
            if let Ok(n) = v.parse() {
                self.sandbox.js_memory_limit_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("JS_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.sandbox.js_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SHARE_TOKEN_SECRET") {
            self.share.token_secret = Some(v);
        }
        if let Ok(v) = std::env::var("SHARE_TOKEN_TTL") {
            if let Ok(n) = v.parse() {
                self.share.token_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("WORKER_VERBOSE") {
            self.worker.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Database URL, `DATABASE_URL`-overridden path wrapped for sqlx.
    pub fn database_url(&self) -> String {
        if self.database.path.contains("://") {
            self.database.path.clone()
        } else {
            format!("sqlite://{}", self.database.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[database]
path = "orchestrator.db"
pool_size = 20

[bus]
redis_url = "redis://localhost:6379"
"#;
        let config = ServerConfig::from_str(toml_content).unwrap();
        assert_eq!(config.database.path, "orchestrator.db");
        assert_eq!(config.database.pool_size, 20);
        assert_eq!(config.bus.redis_url, "redis://localhost:6379");
        assert_eq!(config.sandbox.js_timeout_ms, default_js_timeout_ms());
        assert_eq!(config.share.token_ttl_secs, 604_800);
    }

    #[test]
    fn test_database_url_passthrough_when_already_a_url() {
        let config = ServerConfig {
            server: ServerInfoConfig::default(),
            database: DatabaseConfig {
                path: "sqlite::memory:".to_string(),
                pool_size: 5,
            },
            bus: BusConfig {
                redis_url: "redis://localhost:6379".to_string(),
            },
            sandbox: SandboxConfig::default(),
            share: ShareConfig::default(),
            worker: WorkerConfig::default(),
        };
        assert_eq!(config.database_url(), "sqlite::memory:");
    }

    #[test]
    fn test_env_override_pool_size() {
        std::env::set_var("DB_POOL_SIZE", "42");
        let mut config = ServerConfig::defaults();
        config.apply_env_overrides();
        assert_eq!(config.database.pool_size, 42);
        std::env::remove_var("DB_POOL_SIZE");
    }
}
