//! Cascading judge panel.
//!
//! Holds one to three judges in role order (cheap, primary, tiebreaker) and
//! dispatches them the way the cost policy allows:
//!
//! 1. **Cheap** -- always runs first when the cascade is enabled. If it
//!    answers with high confidence outside the borderline band, the round
//!    stops here.
//! 2. **Primary** -- consulted when the cheap verdict is inconclusive or the
//!    cheap judge failed. With the cascade disabled, cheap and primary are
//!    dispatched together.
//! 3. **Tiebreaker** -- consulted only when the first two composites differ
//!    by more than the tiebreak disagreement, or to stand in for one of them
//!    that failed.
//!
//! Every call carries its own timeout. A timed-out or failing judge is
//! recorded as a non-response and still counts as a model call.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;

use super::aggregator::EvaluatorAggregator;
use crate::domain::errors::{ConfigError, DomainResult};
use crate::domain::models::config::AggregationConfig;
use crate::domain::models::refinement::{
    Confidence, Criterion, FocusedRubric, JudgeFailure, JudgeFailureKind, JudgeRole,
    LessonContent, PanelEvaluation, Rubric, TaggedVerdict,
};
use crate::domain::ports::JudgeService;

const ROLES: [JudgeRole; 3] = [JudgeRole::Cheap, JudgeRole::Primary, JudgeRole::Tiebreaker];

type CallResult = Result<(TaggedVerdict, u64), JudgeFailure>;

/// Cost-ordered panel of judges.
pub struct JudgePanel {
    judges: Vec<Arc<dyn JudgeService>>,
    aggregator: EvaluatorAggregator,
}

impl JudgePanel {
    /// Build a panel. Judges are taken in role order; one to three are
    /// allowed.
    pub fn new(
        judges: Vec<Arc<dyn JudgeService>>,
        rubric: Rubric,
        config: AggregationConfig,
    ) -> DomainResult<Self> {
        if judges.is_empty() || judges.len() > ROLES.len() {
            return Err(ConfigError::InvalidPanelSize(judges.len()).into());
        }
        Ok(Self {
            judges,
            aggregator: EvaluatorAggregator::new(rubric, config),
        })
    }

    pub fn len(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    /// Judge ids in role order.
    pub fn judge_ids(&self) -> Vec<String> {
        self.judges.iter().map(|j| j.id().to_string()).collect()
    }

    /// Indices of judges whose criteria intersect `criteria`.
    pub fn judges_covering(&self, criteria: &BTreeSet<Criterion>) -> Vec<usize> {
        self.judges
            .iter()
            .enumerate()
            .filter(|(_, j)| !j.criteria().is_disjoint(criteria))
            .map(|(i, _)| i)
            .collect()
    }

    /// The aggregator folding this panel's verdicts.
    pub fn aggregator(&self) -> &EvaluatorAggregator {
        &self.aggregator
    }

    fn config(&self) -> &AggregationConfig {
        self.aggregator.config()
    }

    /// Run a full evaluation under the cascade policy, making at most
    /// `call_allowance` model calls.
    pub async fn evaluate(&self, content: &LessonContent, call_allowance: u32) -> PanelEvaluation {
        let rubric = FocusedRubric::from(self.aggregator.rubric().clone());
        let started = Instant::now();
        let mut evaluation = PanelEvaluation::default();
        let cascade = self.config().cascade_enabled;

        // Cheap and primary.
        let first_pass: Vec<usize> = if cascade || self.judges.len() == 1 {
            vec![0]
        } else {
            vec![0, 1]
        };
        let results = self
            .dispatch(content, &rubric, &first_pass, call_allowance, &mut evaluation)
            .await;
        let mut cheap_primary: Vec<Option<f64>> = results;

        if cascade && self.judges.len() > 1 {
            let cheap = evaluation.verdicts.first();
            let escalate = match cheap {
                None => true,
                Some(tagged) => {
                    let composite = self.aggregator.judge_composite(&tagged.verdict);
                    tagged.verdict.confidence != Confidence::High
                        || self.config().is_borderline(composite)
                }
            };
            if escalate {
                tracing::debug!(
                    cheap_responded = cheap.is_some(),
                    "Cheap judge inconclusive; escalating to primary judge"
                );
                let remaining = call_allowance.saturating_sub(evaluation.model_calls);
                let primary = self
                    .dispatch(content, &rubric, &[1], remaining, &mut evaluation)
                    .await;
                cheap_primary.extend(primary);
            }
        }

        // Tiebreaker.
        if self.judges.len() == 3 && cheap_primary.len() == 2 {
            let needed = match (cheap_primary[0], cheap_primary[1]) {
                (Some(a), Some(b)) if self.aggregator.needs_tiebreak(a, b) => {
                    tracing::info!(
                        first = a,
                        second = b,
                        disagreement = (a - b).abs(),
                        "Judges disagree; invoking tiebreaker"
                    );
                    evaluation.tiebreak_invoked = true;
                    true
                }
                (Some(_), None) | (None, Some(_)) => {
                    tracing::info!("One judge did not respond; consulting tiebreaker as substitute");
                    true
                }
                _ => false,
            };
            if needed {
                let remaining = call_allowance.saturating_sub(evaluation.model_calls);
                let _ = self
                    .dispatch(content, &rubric, &[2], remaining, &mut evaluation)
                    .await;
                if evaluation.verdicts.len() < 3 {
                    evaluation.tiebreak_invoked = false;
                }
            }
        }

        tracing::info!(
            responded = evaluation.responded(),
            failed = evaluation.failures.len(),
            model_calls = evaluation.model_calls,
            tiebreak = evaluation.tiebreak_invoked,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Panel evaluation complete"
        );

        evaluation
    }

    /// Run the judges at `indices` concurrently against a focused rubric.
    ///
    /// Used for targeted re-evaluation; no cascade applies.
    pub async fn evaluate_subset(
        &self,
        content: &LessonContent,
        rubric: &FocusedRubric,
        indices: &[usize],
        call_allowance: u32,
    ) -> PanelEvaluation {
        let mut evaluation = PanelEvaluation::default();
        let _ = self
            .dispatch(content, rubric, indices, call_allowance, &mut evaluation)
            .await;
        evaluation
    }

    /// Dispatch judges concurrently and fold their results into
    /// `evaluation`, returning each judge's composite (or `None` on
    /// failure) in `indices` order.
    async fn dispatch(
        &self,
        content: &LessonContent,
        rubric: &FocusedRubric,
        indices: &[usize],
        call_allowance: u32,
        evaluation: &mut PanelEvaluation,
    ) -> Vec<Option<f64>> {
        let allowed: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| *i < self.judges.len())
            .take(call_allowance as usize)
            .collect();
        if allowed.len() < indices.len() {
            tracing::warn!(
                requested = indices.len(),
                allowed = allowed.len(),
                "Model-call budget limits judge dispatch"
            );
        }

        let calls = allowed.iter().map(|i| self.call(*i, content, rubric));
        let results: Vec<CallResult> = join_all(calls).await;

        evaluation.model_calls += allowed.len() as u32;
        results
            .into_iter()
            .map(|result| match result {
                Ok((tagged, tokens)) => {
                    let composite = self.aggregator.judge_composite(&tagged.verdict);
                    evaluation.tokens_used += tokens;
                    evaluation.verdicts.push(tagged);
                    Some(composite)
                }
                Err(failure) => {
                    evaluation.failures.push(failure);
                    None
                }
            })
            .collect()
    }

    async fn call(&self, index: usize, content: &LessonContent, rubric: &FocusedRubric) -> CallResult {
        let judge = &self.judges[index];
        let role = ROLES[index];
        let judge_id = judge.id().to_string();
        let start = Instant::now();

        match tokio::time::timeout(self.config().judge_timeout(), judge.evaluate(content, rubric)).await
        {
            Ok(Ok(report)) => {
                tracing::debug!(
                    judge = %judge_id,
                    role = %role,
                    overall = report.verdict.overall_score,
                    issues = report.verdict.issues.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Judge verdict received"
                );
                Ok((
                    TaggedVerdict {
                        weight: self.config().judge_weight(&judge_id),
                        judge_id,
                        role,
                        verdict: report.verdict,
                    },
                    report.tokens_used,
                ))
            }
            Ok(Err(err)) => {
                tracing::warn!(judge = %judge_id, role = %role, error = %err, "Judge call failed");
                Err(JudgeFailure {
                    judge_id,
                    role,
                    kind: JudgeFailureKind::Error(err.to_string()),
                })
            }
            Err(_) => {
                tracing::warn!(
                    judge = %judge_id,
                    role = %role,
                    timeout_ms = self.config().judge_timeout_ms,
                    "Judge call timed out"
                );
                Err(JudgeFailure {
                    judge_id,
                    role,
                    kind: JudgeFailureKind::TimedOut,
                })
            }
        }
    }
}
