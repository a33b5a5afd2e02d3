//! Infrastructure layer module
//!
//! - Configuration loading (figment)
//! - Logging (tracing subscriber setup)

pub mod config;
pub mod logging;
