//! Replay a composite score series through the convergence controller.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::load_config;
use crate::cli::output::{output, score, CommandOutput};
use crate::domain::models::config::RefineryConfig;
use crate::domain::models::refinement::{
    ActionKind, AggregatedVerdict, Reliability, SessionOutcome,
};
use crate::services::{ConvergenceController, LoopControl, RefinementRouter};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Composite scores of successive full evaluations, e.g. 0.6,0.8,0.91
    #[arg(long, value_delimiter = ',', required = true)]
    pub scores: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeRound {
    pub round: u32,
    pub score: f64,
    pub band: ActionKind,
    pub decision: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeOutput {
    pub rounds: Vec<AnalyzeRound>,
    /// Terminal outcome, if the series reached one.
    pub outcome: Option<SessionOutcome>,
    /// Scores left over after the session would have ended.
    pub ignored_scores: usize,
}

impl CommandOutput for AnalyzeOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{:<6} {:<8} {:<13} {}", "ROUND", "SCORE", "BAND", "DECISION"),
            "-".repeat(60),
        ];
        for round in &self.rounds {
            lines.push(format!(
                "{:<6} {:<8} {:<13} {}",
                round.round,
                score(round.score),
                round.band.to_string(),
                round.decision
            ));
        }

        match &self.outcome {
            Some(outcome) => lines.push(format!("\nOutcome: {outcome}")),
            None => lines.push("\nOutcome: still running after the last score".to_string()),
        }
        if self.ignored_scores > 0 {
            lines.push(format!(
                "{} trailing score(s) ignored after termination",
                self.ignored_scores
            ));
        }

        lines.join("\n")
    }
}

/// A clean, reliable verdict carrying only a composite score.
fn replay_verdict(config: &RefineryConfig, composite: f64) -> AggregatedVerdict {
    AggregatedVerdict {
        composite_score: composite,
        criterion_scores: config.rubric.criteria().map(|(c, _)| (c, composite)).collect(),
        per_criterion_agreement: config.rubric.criteria().map(|(c, _)| (c, 1.0)).collect(),
        overall_agreement: 1.0,
        merged_issues: Vec::new(),
        reliability: Reliability::Reliable,
        conflicts: Vec::new(),
        judge_composites: std::collections::BTreeMap::new(),
        judges_failed: Vec::new(),
        tiebreak_invoked: false,
    }
}

/// Run the controller over each prefix of `scores`, stopping at the first
/// terminal decision.
pub fn replay(config: &RefineryConfig, scores: &[f64]) -> Result<AnalyzeOutput> {
    if let Some(bad) = scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
        anyhow::bail!("Score {bad} is outside [0, 1]");
    }

    let controller = ConvergenceController::new(
        config.convergence.clone(),
        config.thresholds.clone(),
        config.aggregation.escalate_on_conflict,
    );
    let router = RefinementRouter::new(
        config.thresholds.clone(),
        &config.fix,
        config.aggregation.escalate_on_conflict,
    );
    let mut budget = config.limits.budget();

    let mut rounds = Vec::with_capacity(scores.len());
    let mut outcome = None;
    for (index, &current) in scores.iter().enumerate() {
        budget.consume_iteration();
        let verdict = replay_verdict(config, current);
        let control = controller.decide(&budget, &scores[..=index], &verdict, &[]);

        let decision = match &control {
            LoopControl::Continue => "continue".to_string(),
            LoopControl::Terminate(terminal) => terminal.to_string(),
        };
        rounds.push(AnalyzeRound {
            round: index as u32 + 1,
            score: current,
            band: router.band(current),
            decision,
        });

        if let LoopControl::Terminate(terminal) = control {
            outcome = Some(terminal);
            break;
        }
    }

    Ok(AnalyzeOutput {
        ignored_scores: scores.len() - rounds.len(),
        rounds,
        outcome,
    })
}

pub fn execute(args: &AnalyzeArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let out = replay(&config, &args.scores)?;
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::refinement::{AcceptReason, EscalationReason, HardLimit};

    fn replay_default(scores: &[f64]) -> AnalyzeOutput {
        replay(&RefineryConfig::default(), scores).unwrap()
    }

    #[test]
    fn test_improving_series_accepts() {
        let out = replay_default(&[0.60, 0.75, 0.92, 0.95]);
        assert_eq!(out.rounds.len(), 3);
        assert_eq!(out.ignored_scores, 1);
        assert_eq!(out.rounds[0].decision, "continue");
        assert_eq!(out.rounds[2].band, ActionKind::Accept);
        assert_eq!(
            out.outcome,
            Some(SessionOutcome::Accepted {
                reason: AcceptReason::TargetReached,
                score: 0.92
            })
        );
    }

    #[test]
    fn test_oscillating_series_escalates() {
        let out = replay_default(&[0.80, 0.60, 0.80, 0.60]);
        assert!(matches!(
            out.outcome,
            Some(SessionOutcome::Escalated {
                reason: EscalationReason::Oscillation { .. }
            })
        ));
        assert_eq!(out.rounds.len(), 4);
    }

    #[test]
    fn test_iteration_limit() {
        let mut config = RefineryConfig::default();
        config.limits.max_iterations = 2;
        let out = replay(&config, &[0.10, 0.30, 0.50]).unwrap();
        assert_eq!(
            out.outcome,
            Some(SessionOutcome::RejectedHardLimit {
                limit: HardLimit::Iterations { used: 2, max: 2 }
            })
        );
    }

    #[test]
    fn test_unfinished_series() {
        let out = replay_default(&[0.3, 0.5]);
        assert!(out.outcome.is_none());
        assert!(out.to_human().contains("still running"));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        assert!(replay(&RefineryConfig::default(), &[0.5, 1.2]).is_err());
        assert!(replay(&RefineryConfig::default(), &[f64::NAN]).is_err());
    }
}
