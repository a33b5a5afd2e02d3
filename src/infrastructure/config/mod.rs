//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Programmatic defaults
//! - YAML file loading
//! - Environment variable overrides
//! - Validation against the domain config rules

pub mod loader;

pub use loader::{ConfigLoader, CONFIG_DIR, ENV_PREFIX};
