//! Command-line interface.
//!
//! Offline tooling around the refinement loop: inspecting configuration,
//! aggregating recorded judge verdicts and replaying score series through
//! the convergence controller.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

/// Print a command failure and exit with a non-zero status.
///
/// In JSON mode the error goes to stdout as an object so scripted callers
/// always get parseable output.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
