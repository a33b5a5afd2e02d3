//! Router output: the action chosen for a round and, for fix actions, the
//! recommendation that scopes the fix.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::criterion::Criterion;
use super::issue::MergedIssue;

/// Scope of a targeted fix. Created by the router, consumed once by the fix
/// executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecommendation {
    /// Issues the fix must resolve, in priority order.
    pub target_issues: Vec<MergedIssue>,
    /// Sections the fix may rewrite, in document order.
    pub sections_to_modify: Vec<String>,
    /// Sections that must come out byte-identical.
    pub sections_to_preserve: Vec<String>,
    /// Defined terms the fix must not rename.
    pub preserve_terminology: Vec<String>,
}

impl FixRecommendation {
    /// Criteria implicated by the target issues.
    pub fn implicated_criteria(&self) -> BTreeSet<Criterion> {
        self.target_issues.iter().map(MergedIssue::criterion).collect()
    }

    /// Target issues that point into the given section.
    pub fn issues_for_section<'a>(&'a self, locator: &'a str) -> impl Iterator<Item = &'a MergedIssue> + 'a {
        self.target_issues.iter().filter(move |m| {
            m.locations
                .iter()
                .any(|loc| super::content::location_matches(locator, loc))
        })
    }
}

/// Coarse action category, recorded in the iteration log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Accept,
    MinorRefine,
    MajorRefine,
    Reject,
    Escalate,
    /// No action: a hard limit ended the session before routing.
    Stop,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accept => "accept",
            Self::MinorRefine => "minor_refine",
            Self::MajorRefine => "major_refine",
            Self::Reject => "reject",
            Self::Escalate => "escalate",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Why a session or round was handed to a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Judges disagree too much to trust the verdict.
    LowReliability,
    /// Too few judges responded.
    JudgeUnavailable,
    /// Judges asked for opposite edits to the same location.
    ConflictingIssues { locations: Vec<String> },
    /// The score calls for a fix but no issue points at a known section.
    NoActionableIssues,
    /// Fix attempts kept failing verification or regressing.
    FixRetriesExhausted { attempts: u32 },
    /// A locked criterion regressed and no retry is left.
    RegressionDetected,
    /// Scores alternate between rounds.
    Oscillation { autocorrelation: f64 },
    /// Scores stopped improving below the minimum acceptable bar.
    PlateauBelowMinimum { score: f64 },
    /// The caller cancelled the session.
    Cancelled,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowReliability => f.write_str("low judge reliability"),
            Self::JudgeUnavailable => f.write_str("judges unavailable"),
            Self::ConflictingIssues { locations } => {
                write!(f, "conflicting issues at {}", locations.join(", "))
            }
            Self::NoActionableIssues => f.write_str("no actionable issues"),
            Self::FixRetriesExhausted { attempts } => {
                write!(f, "fix retries exhausted after {attempts} attempts")
            }
            Self::RegressionDetected => f.write_str("quality lock regression"),
            Self::Oscillation { autocorrelation } => {
                write!(f, "oscillation (lag-2 autocorrelation {autocorrelation:.3})")
            }
            Self::PlateauBelowMinimum { score } => {
                write!(f, "plateau at {score:.3} below minimum bar")
            }
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What the router decided to do with a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RefinementAction {
    /// Terminal success.
    Accept,
    /// Targeted edit of the sections implicated by open issues.
    MinorRefine { recommendation: FixRecommendation },
    /// Regenerate only the sections holding critical or major issues.
    MajorRefine { recommendation: FixRecommendation },
    /// Full regeneration from the earliest pipeline stage.
    Reject,
    /// Hand off to human review.
    Escalate { reason: EscalationReason },
}

impl RefinementAction {
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Accept => ActionKind::Accept,
            Self::MinorRefine { .. } => ActionKind::MinorRefine,
            Self::MajorRefine { .. } => ActionKind::MajorRefine,
            Self::Reject => ActionKind::Reject,
            Self::Escalate { .. } => ActionKind::Escalate,
        }
    }

    /// The fix recommendation, for fix actions.
    pub const fn recommendation(&self) -> Option<&FixRecommendation> {
        match self {
            Self::MinorRefine { recommendation } | Self::MajorRefine { recommendation } => {
                Some(recommendation)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::refinement::{Issue, Severity};

    fn merged(criterion: Criterion, location: &str) -> MergedIssue {
        MergedIssue::from_issue(
            Issue::new(criterion, Severity::Minor, location, "d", "f"),
            "j1",
        )
    }

    #[test]
    fn test_issues_for_section_matches_suffixed_locations() {
        let rec = FixRecommendation {
            target_issues: vec![
                merged(Criterion::Clarity, "s2#p1"),
                merged(Criterion::Engagement, "s3"),
            ],
            sections_to_modify: vec!["s2".into(), "s3".into()],
            sections_to_preserve: vec!["s1".into()],
            preserve_terminology: Vec::new(),
        };
        assert_eq!(rec.issues_for_section("s2").count(), 1);
        assert_eq!(rec.issues_for_section("s1").count(), 0);
        assert_eq!(
            rec.implicated_criteria(),
            [Criterion::Clarity, Criterion::Engagement].into_iter().collect()
        );
    }

    #[test]
    fn test_action_serializes_with_tag() {
        let action = RefinementAction::Escalate {
            reason: EscalationReason::LowReliability,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "escalate");
        assert_eq!(action.kind(), ActionKind::Escalate);
        assert!(action.recommendation().is_none());
    }
}
