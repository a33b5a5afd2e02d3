//! Convergence controller.
//!
//! Decides after every full evaluation whether the session goes on. It owns
//! termination only: the router picks what to do inside a round, the
//! controller picks whether there is another round.

use crate::domain::models::config::{ConvergenceConfig, ThresholdsConfig};
use crate::domain::models::refinement::series::{detect_oscillation, improvement, is_plateau};
use crate::domain::models::refinement::{
    AcceptReason, AggregatedVerdict, CriterionRegression, EscalationReason, RefinementBudget,
    Reliability, SessionOutcome,
};

/// Loop control after one full evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopControl {
    /// Route the round and keep iterating.
    Continue,
    /// End the session.
    Terminate(SessionOutcome),
}

#[derive(Debug, Clone)]
pub struct ConvergenceController {
    config: ConvergenceConfig,
    thresholds: ThresholdsConfig,
    escalate_on_conflict: bool,
}

impl ConvergenceController {
    pub fn new(
        config: ConvergenceConfig,
        thresholds: ThresholdsConfig,
        escalate_on_conflict: bool,
    ) -> Self {
        Self {
            config,
            thresholds,
            escalate_on_conflict,
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Determine whether the session should continue.
    ///
    /// `scores` holds every full-evaluation composite so far, the current
    /// round's last. Evaluates, in priority order:
    /// 1. Hard limit reached -> rejected, unless this round met the accept
    ///    threshold without overrunning any limit; a limit forbids the next
    ///    round, not the verdict of one already paid for
    /// 2. Accept threshold met with a trustworthy, clean verdict -> accepted
    /// 3. Plateau -> accepted above the minimum bar, escalated below it
    /// 4. Oscillation -> escalated
    /// 5. Continue
    pub fn decide(
        &self,
        budget: &RefinementBudget,
        scores: &[f64],
        verdict: &AggregatedVerdict,
        regressions: &[CriterionRegression],
    ) -> LoopControl {
        let current = verdict.composite_score;
        let clean = regressions.is_empty()
            && !(self.escalate_on_conflict && !verdict.conflicts.is_empty());
        let target_reached =
            current >= self.thresholds.accept && verdict.reliability != Reliability::Low && clean;

        // 1. Budget
        if let Some(limit) = budget.exhausted_limit() {
            if !target_reached || budget.is_overrun() {
                tracing::info!(%limit, "Hard limit reached");
                return LoopControl::Terminate(SessionOutcome::RejectedHardLimit { limit });
            }
            tracing::info!(%limit, current, "Accepting the last round the budget allowed");
        }

        // 2. Target reached
        if target_reached {
            return LoopControl::Terminate(SessionOutcome::Accepted {
                reason: AcceptReason::TargetReached,
                score: current,
            });
        }

        // 3. Plateau against the previous round
        if let [.., previous, _] = scores {
            if is_plateau(*previous, current, self.config.epsilon_abs, self.config.epsilon_rel) {
                let (delta, relative) = improvement(*previous, current);
                tracing::info!(previous, current, delta, relative, "Scores plateaued");
                let outcome = if verdict.reliability == Reliability::Low {
                    SessionOutcome::Escalated {
                        reason: EscalationReason::LowReliability,
                    }
                } else if current >= self.config.plateau_min_score && clean {
                    SessionOutcome::Accepted {
                        reason: AcceptReason::Plateau,
                        score: current,
                    }
                } else {
                    SessionOutcome::Escalated {
                        reason: EscalationReason::PlateauBelowMinimum { score: current },
                    }
                };
                return LoopControl::Terminate(outcome);
            }
        }

        // 4. Oscillation
        if let Some(autocorrelation) = detect_oscillation(
            scores,
            self.config.oscillation_window,
            self.config.oscillation_min_len,
            self.config.oscillation_threshold,
        ) {
            tracing::info!(autocorrelation, "Scores oscillating");
            return LoopControl::Terminate(SessionOutcome::Escalated {
                reason: EscalationReason::Oscillation { autocorrelation },
            });
        }

        LoopControl::Continue
    }
}
