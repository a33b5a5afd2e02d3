pub mod config;
pub mod refinement;

pub use config::{
    AggregationConfig, ConvergenceConfig, FixConfig, LimitsConfig, LoggingConfig,
    RefineryConfig, ThresholdsConfig,
};
pub use refinement::*;
