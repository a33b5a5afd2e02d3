//! Domain errors for the lesson refinement core.

use thiserror::Error;

use super::models::refinement::{CriterionRegression, HardLimit, SessionState};

/// Format a list of judge ids as a comma-separated string.
fn format_judges(ids: &[String]) -> String {
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.join(", ")
    }
}

/// Configuration validation failures.
///
/// Raised at load time and again at session start. Invalid configuration is
/// never coerced into a valid one.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Criterion weights sum to {0:.6}, expected 1.0")]
    WeightsDoNotSumToOne(f64),

    #[error("Weight for criterion {criterion} is {weight}, must be within [0, 1]")]
    WeightOutOfRange { criterion: String, weight: f64 },

    #[error(
        "Routing thresholds out of order: require 0 <= major ({major}) < minor ({minor}) < accept ({accept}) <= 1"
    )]
    ThresholdsOutOfOrder { accept: f64, minor: f64, major: f64 },

    #[error(
        "Agreement buckets out of order: require tentative ({tentative}) < reliable ({reliable}) <= 1"
    )]
    AgreementBucketsOutOfOrder { reliable: f64, tentative: f64 },

    #[error(
        "Entailment thresholds out of order: require 0 <= flag ({flag}) < confirm ({confirm}) <= 1"
    )]
    EntailmentThresholdsOutOfOrder { confirm: f64, flag: f64 },

    #[error("Borderline band inverted: low ({low}) must be below high ({high})")]
    BorderlineBandInverted { low: f64, high: f64 },

    #[error("Invalid {name}: {value}. Must be within [0, 1]")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("Invalid {0}: must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("Invalid oscillation window: {0}. Must be at least 3")]
    OscillationWindowTooSmall(usize),

    #[error("Invalid judge weight for '{judge}': {weight}. Must be positive")]
    InvalidJudgeWeight { judge: String, weight: f64 },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid judge panel size: {0}. Must be between 1 and 3")]
    InvalidPanelSize(usize),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),
}

/// Errors surfaced by the refinement core.
///
/// Transient collaborator failures (`JudgeUnavailable` with quorum met,
/// `FixApplicationFailed` on the first attempt) are recovered locally by the
/// engine. Everything else reaches the caller as an explicit terminal state
/// or as an error from session setup.
#[derive(Debug, Error)]
pub enum RefinementError {
    #[error(
        "Judges unavailable: {responded} of {required} required verdicts returned (failed: {})",
        format_judges(.failed)
    )]
    JudgeUnavailable {
        failed: Vec<String>,
        responded: usize,
        required: usize,
    },

    #[error("Fix application failed: {0}")]
    FixApplicationFailed(String),

    /// Produced by [`SessionReport::outcome_error`] for regression escalations.
    ///
    /// [`SessionReport::outcome_error`]: super::models::refinement::SessionReport::outcome_error
    #[error("Quality lock violated on {} criteria", .0.len())]
    RegressionDetected(Vec<CriterionRegression>),

    /// Produced by [`SessionReport::outcome_error`] for hard-limit rejections.
    ///
    /// [`SessionReport::outcome_error`]: super::models::refinement::SessionReport::outcome_error
    #[error("Hard limit exceeded: {0}")]
    HardLimitExceeded(HardLimit),

    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(#[from] ConfigError),

    #[error("{service} service error: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: SessionState, to: SessionState },
}

impl RefinementError {
    /// Shorthand for an error reported by an external collaborator.
    pub fn service(service: &'static str, message: impl Into<String>) -> Self {
        Self::Service {
            service,
            message: message.into(),
        }
    }

    /// Whether local recovery (retry, quorum degradation) may be attempted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::JudgeUnavailable { .. } | Self::FixApplicationFailed(_) | Self::Service { .. }
        )
    }
}

pub type DomainResult<T> = Result<T, RefinementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judge_unavailable_message_lists_failures() {
        let err = RefinementError::JudgeUnavailable {
            failed: vec!["cheap".to_string(), "primary".to_string()],
            responded: 0,
            required: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("0 of 1"));
        assert!(msg.contains("cheap, primary"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: RefinementError = ConfigError::WeightsDoNotSumToOne(0.9).into();
        assert!(matches!(err, RefinementError::ConfigurationInvalid(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_hard_limit_not_transient() {
        let err = RefinementError::HardLimitExceeded(HardLimit::Iterations { used: 10, max: 10 });
        assert!(!err.is_transient());
        assert!(RefinementError::service("judge", "boom").is_transient());
    }
}
