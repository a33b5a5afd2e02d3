//! CLI command implementations.

pub mod aggregate;
pub mod analyze;
pub mod config;

use std::path::Path;

use anyhow::Result;

use crate::domain::models::config::RefineryConfig;
use crate::infrastructure::config::ConfigLoader;

/// Load the effective configuration: an explicit file when given, the
/// project's `.refinery/` layers otherwise.
pub fn load_config(path: Option<&Path>) -> Result<RefineryConfig> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
