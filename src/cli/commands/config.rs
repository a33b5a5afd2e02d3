//! Configuration CLI commands.

use std::path::Path;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::load_config;
use crate::cli::output::{output, score, CommandOutput};
use crate::domain::models::config::RefineryConfig;
use crate::infrastructure::config::CONFIG_DIR;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Validate the effective configuration
    Validate,
}

#[derive(Debug, Serialize)]
pub struct ConfigShowOutput {
    pub source: String,
    pub config: RefineryConfig,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        let body = serde_yaml::to_string(&self.config).unwrap_or_default();
        format!("# source: {}\n{body}", self.source)
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub source: String,
    pub accept_threshold: f64,
    pub minor_threshold: f64,
    pub major_threshold: f64,
    pub max_iterations: u32,
    pub max_model_calls: u32,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        [
            format!("Configuration is valid ({})", self.source),
            format!(
                "Bands: accept >= {}, minor >= {}, major >= {}",
                score(self.accept_threshold),
                score(self.minor_threshold),
                score(self.major_threshold),
            ),
            format!(
                "Limits: {} iterations, {} model calls",
                self.max_iterations, self.max_model_calls
            ),
        ]
        .join("\n")
    }
}

fn source_label(path: Option<&Path>) -> String {
    path.map_or_else(|| format!("{CONFIG_DIR}/"), |p| p.display().to_string())
}

pub fn execute(args: &ConfigArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    // Loading validates; an invalid file surfaces as the command's error.
    let config = load_config(config_path)?;
    let source = source_label(config_path);

    match args.command {
        ConfigCommands::Show => {
            output(&ConfigShowOutput { source, config }, json_mode);
        }
        ConfigCommands::Validate => {
            let out = ConfigValidateOutput {
                valid: true,
                source,
                accept_threshold: config.thresholds.accept,
                minor_threshold: config.thresholds.minor,
                major_threshold: config.thresholds.major,
                max_iterations: config.limits.max_iterations,
                max_model_calls: config.limits.max_model_calls,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
