use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;
use crate::domain::models::refinement::{validate_weights, RefinementBudget, Rubric};

/// Main configuration structure for the refinery.
///
/// Shared read-only by every session. Validated on load and again when a
/// session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RefineryConfig {
    /// Criterion weights
    #[serde(default)]
    pub rubric: Rubric,

    /// Routing score thresholds
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Judge panel and aggregation settings
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Targeted fix verification settings
    #[serde(default)]
    pub fix: FixConfig,

    /// Hard session limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Plateau and oscillation detection
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RefineryConfig {
    /// Check every section. Invalid values are reported, never coerced.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_weights(self.rubric.weights())?;
        self.thresholds.validate()?;
        self.aggregation.validate()?;
        self.fix.validate()?;
        self.limits.validate()?;
        self.convergence.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { name, value })
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Composite score bands for routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThresholdsConfig {
    /// Accept at or above this score
    #[serde(default = "default_accept")]
    pub accept: f64,

    /// Minor refinement at or above this score
    #[serde(default = "default_minor")]
    pub minor: f64,

    /// Major refinement at or above this score; full regeneration below
    #[serde(default = "default_major")]
    pub major: f64,
}

const fn default_accept() -> f64 {
    0.90
}

const fn default_minor() -> f64 {
    0.75
}

const fn default_major() -> f64 {
    0.60
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            accept: default_accept(),
            minor: default_minor(),
            major: default_major(),
        }
    }
}

impl ThresholdsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.major
            && self.major < self.minor
            && self.minor < self.accept
            && self.accept <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(ConfigError::ThresholdsOutOfOrder {
                accept: self.accept,
                minor: self.minor,
                major: self.major,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Judge panel, cascade and aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AggregationConfig {
    /// Agreement at or above this is reliable
    #[serde(default = "default_reliable_agreement")]
    pub reliable_agreement: f64,

    /// Agreement at or above this is tentative; below is low
    #[serde(default = "default_tentative_agreement")]
    pub tentative_agreement: f64,

    /// Description similarity above which same-criterion issues merge
    #[serde(default = "default_dedup_similarity")]
    pub dedup_similarity: f64,

    /// Composite gap between two judges that calls in the tiebreaker
    #[serde(default = "default_tiebreak_disagreement")]
    pub tiebreak_disagreement: f64,

    /// Lower edge of the borderline band for the cheap judge
    #[serde(default = "default_borderline_low")]
    pub borderline_low: f64,

    /// Upper edge of the borderline band for the cheap judge
    #[serde(default = "default_borderline_high")]
    pub borderline_high: f64,

    /// Run the cheap judge alone first
    #[serde(default = "default_true")]
    pub cascade_enabled: bool,

    /// Per-call judge timeout in milliseconds
    #[serde(default = "default_judge_timeout_ms")]
    pub judge_timeout_ms: u64,

    /// Minimum responding judges for a usable verdict
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Reliability weight per judge id; unlisted judges weigh 1.0
    #[serde(default)]
    pub judge_weights: BTreeMap<String, f64>,

    /// Escalate when judges ask for opposite edits at one location
    #[serde(default = "default_true")]
    pub escalate_on_conflict: bool,
}

const fn default_reliable_agreement() -> f64 {
    0.80
}

const fn default_tentative_agreement() -> f64 {
    0.67
}

const fn default_dedup_similarity() -> f64 {
    0.6
}

const fn default_tiebreak_disagreement() -> f64 {
    0.1
}

const fn default_borderline_low() -> f64 {
    0.85
}

const fn default_borderline_high() -> f64 {
    0.95
}

const fn default_true() -> bool {
    true
}

const fn default_judge_timeout_ms() -> u64 {
    60_000
}

const fn default_quorum() -> usize {
    1
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            reliable_agreement: default_reliable_agreement(),
            tentative_agreement: default_tentative_agreement(),
            dedup_similarity: default_dedup_similarity(),
            tiebreak_disagreement: default_tiebreak_disagreement(),
            borderline_low: default_borderline_low(),
            borderline_high: default_borderline_high(),
            cascade_enabled: true,
            judge_timeout_ms: default_judge_timeout_ms(),
            quorum: default_quorum(),
            judge_weights: BTreeMap::new(),
            escalate_on_conflict: true,
        }
    }
}

impl AggregationConfig {
    /// Configured weight of a judge.
    pub fn judge_weight(&self, judge_id: &str) -> f64 {
        self.judge_weights.get(judge_id).copied().unwrap_or(1.0)
    }

    pub const fn judge_timeout(&self) -> Duration {
        Duration::from_millis(self.judge_timeout_ms)
    }

    /// Whether a cheap-judge composite falls in the borderline band.
    pub fn is_borderline(&self, score: f64) -> bool {
        (self.borderline_low..=self.borderline_high).contains(&score)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tentative_agreement < self.reliable_agreement && self.reliable_agreement <= 1.0) {
            return Err(ConfigError::AgreementBucketsOutOfOrder {
                reliable: self.reliable_agreement,
                tentative: self.tentative_agreement,
            });
        }
        unit("dedup_similarity", self.dedup_similarity)?;
        unit("tiebreak_disagreement", self.tiebreak_disagreement)?;
        unit("borderline_low", self.borderline_low)?;
        unit("borderline_high", self.borderline_high)?;
        if self.borderline_low >= self.borderline_high {
            return Err(ConfigError::BorderlineBandInverted {
                low: self.borderline_low,
                high: self.borderline_high,
            });
        }
        if self.judge_timeout_ms == 0 {
            return Err(ConfigError::ZeroLimit("judge_timeout_ms"));
        }
        if self.quorum == 0 {
            return Err(ConfigError::ZeroLimit("quorum"));
        }
        for (judge, weight) in &self.judge_weights {
            if !(*weight > 0.0 && weight.is_finite()) {
                return Err(ConfigError::InvalidJudgeWeight {
                    judge: judge.clone(),
                    weight: *weight,
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fix
// ---------------------------------------------------------------------------

/// Targeted fix and verification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FixConfig {
    /// Entailment at or above this confirms a fix
    #[serde(default = "default_entailment_confirm")]
    pub entailment_confirm: f64,

    /// Entailment at or above this flags a fix for re-judging; below fails it
    #[serde(default = "default_entailment_flag")]
    pub entailment_flag: f64,

    /// Allowed drop below a locked criterion score
    #[serde(default = "default_regression_tolerance")]
    pub regression_tolerance: f64,

    /// Criterion score at which the quality lock pins it
    #[serde(default = "default_lock_threshold")]
    pub lock_threshold: f64,

    /// Uninvolved judges re-run as canaries during targeted re-evaluation
    #[serde(default = "default_canary_count")]
    pub canary_count: usize,

    /// Consecutive failed fix attempts tolerated before escalating
    #[serde(default = "default_max_fix_retries")]
    pub max_fix_retries: u32,

    /// Cap on issues targeted by one fix
    #[serde(default = "default_max_issues_per_fix")]
    pub max_issues_per_fix: usize,

    /// Length of referenced-section excerpts passed for continuity
    #[serde(default = "default_anchor_excerpt_chars")]
    pub anchor_excerpt_chars: usize,

    /// Seed for canary selection; random when unset
    #[serde(default)]
    pub canary_seed: Option<u64>,
}

const fn default_entailment_confirm() -> f64 {
    0.85
}

const fn default_entailment_flag() -> f64 {
    0.70
}

const fn default_regression_tolerance() -> f64 {
    0.05
}

const fn default_lock_threshold() -> f64 {
    0.80
}

const fn default_canary_count() -> usize {
    1
}

const fn default_max_fix_retries() -> u32 {
    1
}

const fn default_max_issues_per_fix() -> usize {
    5
}

const fn default_anchor_excerpt_chars() -> usize {
    240
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            entailment_confirm: default_entailment_confirm(),
            entailment_flag: default_entailment_flag(),
            regression_tolerance: default_regression_tolerance(),
            lock_threshold: default_lock_threshold(),
            canary_count: default_canary_count(),
            max_fix_retries: default_max_fix_retries(),
            max_issues_per_fix: default_max_issues_per_fix(),
            anchor_excerpt_chars: default_anchor_excerpt_chars(),
            canary_seed: None,
        }
    }
}

impl FixConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 <= self.entailment_flag
            && self.entailment_flag < self.entailment_confirm
            && self.entailment_confirm <= 1.0)
        {
            return Err(ConfigError::EntailmentThresholdsOutOfOrder {
                confirm: self.entailment_confirm,
                flag: self.entailment_flag,
            });
        }
        unit("regression_tolerance", self.regression_tolerance)?;
        unit("lock_threshold", self.lock_threshold)?;
        if self.max_issues_per_fix == 0 {
            return Err(ConfigError::ZeroLimit("max_issues_per_fix"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Hard session limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Maximum evaluation rounds
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Maximum session wall time in seconds
    #[serde(default = "default_max_elapsed_secs")]
    pub max_elapsed_secs: u64,

    /// Maximum model calls across judges, fixes and regeneration
    #[serde(default = "default_max_model_calls")]
    pub max_model_calls: u32,

    /// Maximum tokens across all calls
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_max_elapsed_secs() -> u64 {
    300
}

const fn default_max_model_calls() -> u32 {
    50
}

const fn default_max_tokens() -> u64 {
    500_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_elapsed_secs: default_max_elapsed_secs(),
            max_model_calls: default_max_model_calls(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LimitsConfig {
    pub const fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }

    /// A fresh budget with these limits.
    pub const fn budget(&self) -> RefinementBudget {
        RefinementBudget::new(
            self.max_iterations,
            self.max_elapsed(),
            self.max_model_calls,
            self.max_tokens,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroLimit("max_iterations"));
        }
        if self.max_elapsed_secs == 0 {
            return Err(ConfigError::ZeroLimit("max_elapsed_secs"));
        }
        if self.max_model_calls == 0 {
            return Err(ConfigError::ZeroLimit("max_model_calls"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroLimit("max_tokens"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

/// Plateau and oscillation detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// Absolute improvement below which a round counts as flat
    #[serde(default = "default_epsilon_abs")]
    pub epsilon_abs: f64,

    /// Relative improvement below which a round counts as flat
    #[serde(default = "default_epsilon_rel")]
    pub epsilon_rel: f64,

    /// Trailing rounds inspected for oscillation
    #[serde(default = "default_oscillation_window")]
    pub oscillation_window: usize,

    /// Fewest rounds needed before oscillation is checked
    #[serde(default = "default_oscillation_min_len")]
    pub oscillation_min_len: usize,

    /// Lag-2 autocorrelation above which scores oscillate
    #[serde(default = "default_oscillation_threshold")]
    pub oscillation_threshold: f64,

    /// Plateaus at or above this score are accepted; below, escalated
    #[serde(default = "default_plateau_min_score")]
    pub plateau_min_score: f64,

    /// Log lifecycle events through tracing
    #[serde(default = "default_true")]
    pub event_emission_enabled: bool,
}

const fn default_epsilon_abs() -> f64 {
    0.02
}

const fn default_epsilon_rel() -> f64 {
    0.05
}

const fn default_oscillation_window() -> usize {
    4
}

const fn default_oscillation_min_len() -> usize {
    3
}

const fn default_oscillation_threshold() -> f64 {
    0.5
}

const fn default_plateau_min_score() -> f64 {
    0.75
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            epsilon_abs: default_epsilon_abs(),
            epsilon_rel: default_epsilon_rel(),
            oscillation_window: default_oscillation_window(),
            oscillation_min_len: default_oscillation_min_len(),
            oscillation_threshold: default_oscillation_threshold(),
            plateau_min_score: default_plateau_min_score(),
            event_emission_enabled: true,
        }
    }
}

impl ConvergenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit("epsilon_abs", self.epsilon_abs)?;
        unit("epsilon_rel", self.epsilon_rel)?;
        unit("plateau_min_score", self.plateau_min_score)?;
        unit("oscillation_threshold", self.oscillation_threshold)?;
        if self.oscillation_min_len < 3 {
            return Err(ConfigError::OscillationWindowTooSmall(self.oscillation_min_len));
        }
        if self.oscillation_window < self.oscillation_min_len {
            return Err(ConfigError::OscillationWindowTooSmall(self.oscillation_window));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of daily log files to retain
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    7
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RefineryConfig::default();
        config.validate().expect("default config should be valid");
        assert!((config.thresholds.accept - 0.90).abs() < f64::EPSILON);
        assert_eq!(config.limits.max_iterations, 10);
        assert_eq!(config.limits.max_model_calls, 50);
        assert_eq!(config.limits.max_elapsed(), Duration::from_secs(300));
    }

    #[test]
    fn test_thresholds_out_of_order() {
        let mut config = RefineryConfig::default();
        config.thresholds.minor = 0.95;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdsOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_agreement_buckets_out_of_order() {
        let config = AggregationConfig {
            tentative_agreement: 0.9,
            ..AggregationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AgreementBucketsOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_entailment_out_of_order() {
        let config = FixConfig {
            entailment_flag: 0.9,
            ..FixConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EntailmentThresholdsOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_borderline_band_inverted() {
        let config = AggregationConfig {
            borderline_low: 0.95,
            borderline_high: 0.85,
            ..AggregationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BorderlineBandInverted { .. })
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let limits = LimitsConfig {
            max_model_calls: 0,
            ..LimitsConfig::default()
        };
        assert_eq!(limits.validate(), Err(ConfigError::ZeroLimit("max_model_calls")));
    }

    #[test]
    fn test_invalid_judge_weight() {
        let mut config = AggregationConfig::default();
        config.judge_weights.insert("gpt".to_string(), 0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJudgeWeight { .. })
        ));
        assert!((AggregationConfig::default().judge_weight("anyone") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_oscillation_window_too_small() {
        let config = ConvergenceConfig {
            oscillation_min_len: 2,
            ..ConvergenceConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::OscillationWindowTooSmall(2)));
    }

    #[test]
    fn test_borderline_band_inclusive() {
        let config = AggregationConfig::default();
        assert!(config.is_borderline(0.85));
        assert!(config.is_borderline(0.95));
        assert!(!config.is_borderline(0.96));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r"
thresholds:
  accept: 0.92
limits:
  max_iterations: 4
";
        let config: RefineryConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert!((config.thresholds.accept - 0.92).abs() < f64::EPSILON);
        assert!((config.thresholds.minor - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.limits.max_iterations, 4);
        assert_eq!(config.limits.max_model_calls, 50);
        assert_eq!(config.rubric, Rubric::default());
    }
}
