use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};

use crate::domain::errors::ConfigError;
use crate::domain::models::config::RefineryConfig;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".refinery";

/// Prefix for environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "REFINERY_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .refinery/config.yaml (project config)
    /// 3. .refinery/local.yaml (project local overrides, optional)
    /// 4. Environment variables (REFINERY_* prefix, highest priority)
    pub fn load() -> Result<RefineryConfig> {
        let config: RefineryConfig = Figment::new()
            .merge(Serialized::defaults(RefineryConfig::default()))
            .merge(Yaml::file(format!("{CONFIG_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{CONFIG_DIR}/local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Environment overrides still apply on top of the file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<RefineryConfig> {
        if !path.as_ref().is_file() {
            anyhow::bail!("Config file not found: {}", path.as_ref().display());
        }

        let config: RefineryConfig = Figment::new()
            .merge(Serialized::defaults(RefineryConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Invalid values are reported, never coerced.
    pub fn validate(config: &RefineryConfig) -> Result<(), ConfigError> {
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::refinement::Criterion;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RefineryConfig::default();
        assert!((config.thresholds.accept - 0.90).abs() < f64::EPSILON);
        assert_eq!(config.limits.max_iterations, 10);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
thresholds:
  accept: 0.92
  minor: 0.8
  major: 0.6
aggregation:
  judge_weights:
    primary: 2.0
limits:
  max_iterations: 4
logging:
  level: debug
  format: json
";

        let config: RefineryConfig = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert!((config.thresholds.accept - 0.92).abs() < f64::EPSILON);
        assert!((config.aggregation.judge_weight("primary") - 2.0).abs() < f64::EPSILON);
        assert!((config.aggregation.judge_weight("cheap") - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.limits.max_iterations, 4);
        assert_eq!(config.limits.max_model_calls, 50);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_load_from_file_merges_defaults() {
        let file = yaml_file("fix:\n  canary_count: 2\n  canary_seed: 42\n");
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.fix.canary_count, 2);
        assert_eq!(config.fix.canary_seed, Some(42));
        assert!((config.fix.entailment_confirm - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file_rejects_bad_weights() {
        let file = yaml_file("rubric:\n  weights:\n    clarity: 0.5\n");
        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(
            err.downcast_ref::<ConfigError>()
                .is_some_and(|e| matches!(e, ConfigError::WeightsDoNotSumToOne(_))),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_rebalanced_weights_accepted() {
        let file = yaml_file(
            "rubric:\n  weights:\n    clarity: 0.10\n    engagement: 0.15\n",
        );
        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert!((config.rubric.weight(Criterion::Clarity) - 0.10).abs() < f64::EPSILON);
        assert!((config.rubric.weight(Criterion::Engagement) - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = RefineryConfig::default();
        config.logging.format = "xml".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogFormat(format) => assert_eq!(format, "xml"),
            other => panic!("Expected InvalidLogFormat error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_override() {
        let file = yaml_file("limits:\n  max_iterations: 4\n");
        temp_env::with_vars(
            [
                ("REFINERY_LIMITS__MAX_ITERATIONS", Some("7")),
                ("REFINERY_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.limits.max_iterations, 7, "Env should win over file");
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        let base_file = yaml_file("limits:\n  max_iterations: 5\nlogging:\n  level: info\n  format: json\n");
        let override_file = yaml_file("limits:\n  max_iterations: 8\nlogging:\n  level: debug\n");

        let config: RefineryConfig = Figment::new()
            .merge(Serialized::defaults(RefineryConfig::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.limits.max_iterations, 8, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
