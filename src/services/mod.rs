//! Refinement services.
//!
//! - `aggregator` / `agreement`: fold a panel's verdicts into one verdict
//! - `judge_panel`: cascading cheap/primary/tiebreaker dispatch
//! - `router`: map a verdict to an action
//! - `fix_executor`: scoped fixes with entailment and re-evaluation checks
//! - `convergence_controller`: termination decisions
//! - `refinement_engine`: the session loop tying them together

pub mod aggregator;
pub mod agreement;
pub mod convergence_controller;
pub mod fix_executor;
pub mod judge_panel;
pub mod refinement_engine;
pub mod router;

pub use aggregator::EvaluatorAggregator;
pub use convergence_controller::{ConvergenceController, LoopControl};
pub use fix_executor::{FixMode, FixOutcome, FixRequest, TargetedFixExecutor};
pub use judge_panel::JudgePanel;
pub use refinement_engine::{run_refinement_session, Collaborators, RefinementEngine};
pub use router::{RefinementRouter, RoutingContext};
