//! Refinement lifecycle events for observability.
//!
//! Events are emitted inline by the session engine. They are always logged
//! through `tracing` and, when a listener is attached, also published on a
//! broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::RefinementBudget;
use super::quality_lock::CriterionRegression;
use super::recommendation::ActionKind;
use super::session::{FixStatus, IterationRecord, SessionOutcome};
use super::verdict::Reliability;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementEvent {
    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// A session entered its first round.
    SessionStarted {
        session_id: Uuid,
        sections: usize,
        budget: RefinementBudget,
        timestamp: DateTime<Utc>,
    },

    /// A session reached its terminal state.
    SessionTerminated {
        session_id: Uuid,
        outcome: SessionOutcome,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    // -------------------------------------------------------------------
    // Per-round
    // -------------------------------------------------------------------

    /// A full evaluation was aggregated.
    VerdictAggregated {
        session_id: Uuid,
        iteration: u32,
        composite: f64,
        reliability: Reliability,
        judges_responded: usize,
        merged_issues: usize,
        timestamp: DateTime<Utc>,
    },

    /// The first two judges disagreed and the tiebreaker was consulted.
    TiebreakInvoked {
        session_id: Uuid,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },

    /// The router picked an action.
    ActionRouted {
        session_id: Uuid,
        iteration: u32,
        action: ActionKind,
        timestamp: DateTime<Utc>,
    },

    /// A fix or regeneration finished verification.
    FixVerified {
        session_id: Uuid,
        iteration: u32,
        status: FixStatus,
        sections: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The quality lock caught a regression.
    RegressionDetected {
        session_id: Uuid,
        iteration: u32,
        regressions: Vec<CriterionRegression>,
        timestamp: DateTime<Utc>,
    },

    /// A round was appended to the iteration log.
    IterationRecorded {
        session_id: Uuid,
        record: IterationRecord,
        timestamp: DateTime<Utc>,
    },
}

impl RefinementEvent {
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionTerminated { .. } => "session_terminated",
            Self::VerdictAggregated { .. } => "verdict_aggregated",
            Self::TiebreakInvoked { .. } => "tiebreak_invoked",
            Self::ActionRouted { .. } => "action_routed",
            Self::FixVerified { .. } => "fix_verified",
            Self::RegressionDetected { .. } => "regression_detected",
            Self::IterationRecorded { .. } => "iteration_recorded",
        }
    }

    pub const fn session_id(&self) -> Uuid {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::SessionTerminated { session_id, .. }
            | Self::VerdictAggregated { session_id, .. }
            | Self::TiebreakInvoked { session_id, .. }
            | Self::ActionRouted { session_id, .. }
            | Self::FixVerified { session_id, .. }
            | Self::RegressionDetected { session_id, .. }
            | Self::IterationRecorded { session_id, .. } => *session_id,
        }
    }
}
