//! Lesson Refinery - multi-judge refinement loop for generated lessons
//!
//! A panel of judges scores a lesson against a weighted rubric. The
//! aggregated verdict is routed to accept, a targeted fix, a section
//! regeneration, a full regeneration or human review, and a convergence
//! controller decides when the loop stops.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the collaborator ports
//!   (judges, fix generator, content pipeline, entailment checker)
//! - **Service Layer** (`services`): aggregation, routing, fixing,
//!   convergence control and the session engine
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and
//!   logging
//! - **CLI Layer** (`cli`): offline tooling
//!
//! # Example
//!
//! ```ignore
//! use lesson_refinery::{run_refinement_session, Collaborators, RefineryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RefineryConfig::default();
//!     let report = run_refinement_session(lesson, config.rubric.clone(), config, collaborators).await?;
//!     println!("{}", report.outcome);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{ConfigError, DomainResult, RefinementError};
pub use domain::models::config::RefineryConfig;
pub use domain::models::refinement::{
    AggregatedVerdict, Criterion, FixRecommendation, IterationLog, IterationRecord, JudgeVerdict,
    LessonContent, RefinementAction, RefinementBudget, Rubric, Section, SessionOutcome,
    SessionReport,
};
pub use domain::ports::{ContentPipeline, EntailmentChecker, FixGenerator, JudgeService};
pub use infrastructure::config::ConfigLoader;
pub use services::{
    run_refinement_session, Collaborators, ConvergenceController, EvaluatorAggregator,
    RefinementEngine, RefinementRouter, TargetedFixExecutor,
};
