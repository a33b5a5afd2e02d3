//! Lesson Refinery CLI entry point.

use clap::Parser;

use lesson_refinery::cli::{commands, handle_error, Cli, Commands};
use lesson_refinery::infrastructure::logging::{LogConfig, LoggerImpl};

fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // Logging follows the loaded configuration; an unloadable configuration
    // falls back to defaults here and is reported by the command itself.
    let log_config = commands::load_config(config_path)
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match &cli.command {
        Commands::Config(args) => commands::config::execute(args, config_path, cli.json),
        Commands::Aggregate(args) => commands::aggregate::execute(args, config_path, cli.json),
        Commands::Analyze(args) => commands::analyze::execute(args, config_path, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
