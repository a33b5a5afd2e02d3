//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::aggregate::AggregateArgs;
use super::commands::analyze::AnalyzeArgs;
use super::commands::config::ConfigArgs;

#[derive(Parser, Debug)]
#[command(name = "lesson-refinery")]
#[command(about = "Lesson Refinery - multi-judge refinement loop tooling", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .refinery/
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration inspection
    Config(ConfigArgs),

    /// Aggregate recorded judge verdicts and show the routed action
    Aggregate(AggregateArgs),

    /// Replay a score series through the convergence controller
    Analyze(AnalyzeArgs),
}
