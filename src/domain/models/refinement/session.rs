//! Session state machine, iteration log and terminal outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::{HardLimit, RefinementBudget};
use super::content::LessonContent;
use super::issue::IssueLedger;
use super::quality_lock::CriterionRegression;
use super::recommendation::{ActionKind, EscalationReason};
use super::verdict::{AggregatedVerdict, Reliability};
use crate::domain::errors::{DomainResult, RefinementError};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is within a round.
///
/// ```text
/// Evaluating --route--> Fixing --> ReEvaluating --> Evaluating | Terminal
///      |                  |
///      +--> Terminal      +--> Evaluating (regeneration) | Terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Evaluating,
    Fixing,
    ReEvaluating,
    Terminal,
}

impl SessionState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Evaluating, Self::Fixing | Self::Terminal)
                | (Self::Fixing, Self::ReEvaluating | Self::Evaluating | Self::Terminal)
                | (Self::ReEvaluating, Self::Evaluating | Self::Terminal)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(self, next: Self) -> DomainResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RefinementError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evaluating => f.write_str("evaluating"),
            Self::Fixing => f.write_str("fixing"),
            Self::ReEvaluating => f.write_str("re-evaluating"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

// ---------------------------------------------------------------------------
// IterationRecord / IterationLog
// ---------------------------------------------------------------------------

/// How a round's edit fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    /// Entailment confirmed and targeted re-evaluation clean.
    Confirmed,
    /// Entailment in the flag band; kept, pending the next full evaluation.
    Flagged,
    /// Fix service error or every targeted section failed verification.
    Failed,
    /// A locked criterion regressed; the edit was reverted.
    Regressed,
    /// Sections or the whole lesson were regenerated.
    Regenerated,
}

impl FixStatus {
    /// Whether the attempt counts against the fix retry allowance.
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Regressed)
    }
}

/// One round of the session. Appended once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Zero-based round index.
    pub iteration_index: u32,
    /// Action taken this round.
    pub action: ActionKind,
    /// Composite of this round's full evaluation.
    pub score_before: f64,
    /// Composite after the edit, when a targeted re-evaluation ran.
    pub score_after: Option<f64>,
    /// Wall time spent in the round, in milliseconds.
    pub elapsed_ms: u64,
    /// Tokens spent in the round.
    pub tokens_spent: u64,
    /// Model calls made in the round.
    pub model_calls: u32,
    /// Reliability of this round's aggregated verdict.
    pub reliability: Reliability,
    /// Outcome of the edit, for fix and regeneration rounds.
    pub fix_status: Option<FixStatus>,
    /// Sections the round rewrote.
    #[serde(default)]
    pub sections_touched: Vec<String>,
    /// Quality-lock violations observed during the round.
    #[serde(default)]
    pub regressions: Vec<CriterionRegression>,
}

/// Append-only record of a session's rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationLog {
    records: Vec<IterationRecord>,
}

impl IterationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Full-evaluation composites in round order.
    pub fn scores(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.score_before).collect()
    }

    /// Number of trailing fix attempts that failed or regressed.
    pub fn consecutive_failed_fixes(&self) -> u32 {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.fix_status.is_some_and(FixStatus::is_failure))
            .count() as u32
    }

    /// Total tokens across all rounds.
    pub fn total_tokens(&self) -> u64 {
        self.records.iter().map(|r| r.tokens_spent).sum()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptReason {
    /// Composite reached the accept threshold.
    TargetReached,
    /// Scores stopped improving above the minimum bar.
    Plateau,
}

/// The single terminal state a session ends in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Accepted { reason: AcceptReason, score: f64 },
    RejectedHardLimit { limit: HardLimit },
    Escalated { reason: EscalationReason },
}

impl SessionOutcome {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::RejectedHardLimit { .. } => "rejected_hard_limit",
            Self::Escalated { .. } => "escalated",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { reason, score } => match reason {
                AcceptReason::TargetReached => write!(f, "accepted at {score:.3}"),
                AcceptReason::Plateau => write!(f, "accepted on plateau at {score:.3}"),
            },
            Self::RejectedHardLimit { limit } => write!(f, "rejected: hard limit ({limit})"),
            Self::Escalated { reason } => write!(f, "escalated: {reason}"),
        }
    }
}

/// Everything a finished session hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    /// Last fully verified content.
    pub final_content: LessonContent,
    pub outcome: SessionOutcome,
    pub iteration_log: IterationLog,
    pub issue_ledger: IssueLedger,
    pub budget: RefinementBudget,
    /// Verdict from the last completed full evaluation.
    pub final_verdict: Option<AggregatedVerdict>,
}

impl SessionReport {
    /// The error for callers that treat a failed session as an `Err`.
    ///
    /// Hard-limit rejections map to [`RefinementError::HardLimitExceeded`]
    /// and regression escalations to [`RefinementError::RegressionDetected`]
    /// carrying the most recent regressions. Every other outcome is `None`.
    pub fn outcome_error(&self) -> Option<RefinementError> {
        match &self.outcome {
            SessionOutcome::RejectedHardLimit { limit } => {
                Some(RefinementError::HardLimitExceeded(*limit))
            }
            SessionOutcome::Escalated {
                reason: EscalationReason::RegressionDetected,
            } => {
                let regressions = self
                    .iteration_log
                    .records()
                    .iter()
                    .rev()
                    .find(|r| !r.regressions.is_empty())
                    .map(|r| r.regressions.clone())
                    .unwrap_or_default();
                Some(RefinementError::RegressionDetected(regressions))
            }
            _ => None,
        }
    }
}
