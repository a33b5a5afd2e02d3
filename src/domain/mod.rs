//! Domain layer for the lesson refinement core
//!
//! This module contains the refinement data model, configuration, error
//! taxonomy and the ports to external collaborators.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{ConfigError, DomainResult, RefinementError};
