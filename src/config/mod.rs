//! Configuration module for the orchestrator
//!
//! Server configuration (TOML, env-var overridden) plus a generic YAML
//! loader with `$include` and `${VAR:default}` support, used to load
//! workflow-graph fixtures outside the visual editor (tests, seed data).

pub mod loader;
pub mod server;

pub use loader::{deep_merge, load_yaml_config, load_yaml_file};
pub use server::{
    BusConfig, ConfigError, DatabaseConfig, SandboxConfig, ServerConfig, ServerConfigError,
    ShareConfig, WorkerConfig,
};
