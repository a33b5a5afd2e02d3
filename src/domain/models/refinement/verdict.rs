//! Judge verdicts and the aggregated verdict derived from them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::criterion::Criterion;
use super::issue::{Issue, IssueConflict, MergedIssue};

// ---------------------------------------------------------------------------
// Confidence / Reliability
// ---------------------------------------------------------------------------

/// A judge's self-reported confidence in its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// How far the aggregated verdict can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Low,
    Tentative,
    Reliable,
}

impl Reliability {
    /// Bucket an agreement statistic.
    pub fn from_agreement(agreement: f64, reliable: f64, tentative: f64) -> Self {
        if agreement >= reliable {
            Self::Reliable
        } else if agreement >= tentative {
            Self::Tentative
        } else {
            Self::Low
        }
    }

    /// Reliability of a single-judge verdict, which has no agreement to
    /// measure.
    pub const fn from_confidence(confidence: Confidence) -> Self {
        match confidence {
            Confidence::High => Self::Reliable,
            Confidence::Medium => Self::Tentative,
            Confidence::Low => Self::Low,
        }
    }

    /// One bucket worse. `Low` stays `Low`.
    #[must_use]
    pub const fn downgrade(self) -> Self {
        match self {
            Self::Reliable => Self::Tentative,
            Self::Tentative | Self::Low => Self::Low,
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => f.write_str("reliable"),
            Self::Tentative => f.write_str("tentative"),
            Self::Low => f.write_str("low"),
        }
    }
}

// ---------------------------------------------------------------------------
// JudgeVerdict
// ---------------------------------------------------------------------------

/// One judge's output for one evaluation call. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// The judge's own holistic score in `[0, 1]`.
    pub overall_score: f64,
    /// Per-criterion scores in `[0, 1]`.
    #[serde(default)]
    pub criteria_scores: BTreeMap<Criterion, f64>,
    /// Problems found.
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Self-reported confidence.
    pub confidence: Confidence,
}

impl JudgeVerdict {
    /// A verdict that scores every criterion at `score`, with no issues.
    pub fn uniform(score: f64, confidence: Confidence) -> Self {
        Self {
            overall_score: score,
            criteria_scores: Criterion::ALL.iter().map(|c| (*c, score)).collect(),
            issues: Vec::new(),
            confidence,
        }
    }

    /// Attach issues.
    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    /// Score for `criterion`, falling back to the overall score.
    pub fn score_for(&self, criterion: Criterion) -> f64 {
        self.criteria_scores
            .get(&criterion)
            .copied()
            .unwrap_or(self.overall_score)
            .clamp(0.0, 1.0)
    }
}

/// A verdict together with what it cost to obtain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub verdict: JudgeVerdict,
    pub tokens_used: u64,
}

// ---------------------------------------------------------------------------
// Panel output
// ---------------------------------------------------------------------------

/// Position a judge occupies in the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeRole {
    /// Inexpensive first-pass judge.
    Cheap,
    /// Full-strength judge consulted when the cheap pass is inconclusive.
    Primary,
    /// Third judge invoked only when the first two disagree.
    Tiebreaker,
}

impl fmt::Display for JudgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cheap => f.write_str("cheap"),
            Self::Primary => f.write_str("primary"),
            Self::Tiebreaker => f.write_str("tiebreaker"),
        }
    }
}

/// A verdict tagged with the judge that produced it and that judge's
/// configured reliability weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedVerdict {
    pub judge_id: String,
    pub role: JudgeRole,
    #[serde(default = "default_judge_weight")]
    pub weight: f64,
    pub verdict: JudgeVerdict,
}

fn default_judge_weight() -> f64 {
    1.0
}

/// Why a dispatched judge produced no verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JudgeFailureKind {
    TimedOut,
    Error(String),
}

/// A dispatched judge that did not respond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeFailure {
    pub judge_id: String,
    pub role: JudgeRole,
    pub kind: JudgeFailureKind,
}

/// Everything one panel pass produced: the input to aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelEvaluation {
    /// Verdicts in dispatch order.
    pub verdicts: Vec<TaggedVerdict>,
    /// Judges that failed or timed out.
    #[serde(default)]
    pub failures: Vec<JudgeFailure>,
    /// Whether the tiebreaker was consulted.
    #[serde(default)]
    pub tiebreak_invoked: bool,
    /// Model calls made, including failures.
    #[serde(default)]
    pub model_calls: u32,
    /// Tokens spent by responding judges.
    #[serde(default)]
    pub tokens_used: u64,
}

impl PanelEvaluation {
    /// Number of judges that returned a verdict.
    pub fn responded(&self) -> usize {
        self.verdicts.len()
    }
}

// ---------------------------------------------------------------------------
// AggregatedVerdict
// ---------------------------------------------------------------------------

/// One round's combined verdict. Derived fresh every round, never stored
/// across rounds except inside iteration records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedVerdict {
    /// Rubric-weighted sum of the consensus criterion scores.
    pub composite_score: f64,
    /// Consensus score per criterion.
    pub criterion_scores: BTreeMap<Criterion, f64>,
    /// Agreement statistic per criterion, in `[-1, 1]`.
    pub per_criterion_agreement: BTreeMap<Criterion, f64>,
    /// Rubric-weighted mean of the per-criterion agreement.
    pub overall_agreement: f64,
    /// Deduplicated issues in priority order.
    pub merged_issues: Vec<MergedIssue>,
    /// Trust bucket.
    pub reliability: Reliability,
    /// Issues at the same location asking for opposite edits.
    #[serde(default)]
    pub conflicts: Vec<IssueConflict>,
    /// Per-judge composite scores, keyed by judge id.
    pub judge_composites: BTreeMap<String, f64>,
    /// Ids of judges that failed or timed out.
    #[serde(default)]
    pub judges_failed: Vec<String>,
    /// Whether a tiebreaker contributed.
    pub tiebreak_invoked: bool,
}

impl AggregatedVerdict {
    /// Number of judges that contributed.
    pub fn judges_responded(&self) -> usize {
        self.judge_composites.len()
    }

    /// Ids of the judges that returned a verdict this round.
    pub fn responding_judges(&self) -> BTreeSet<String> {
        self.judge_composites.keys().cloned().collect()
    }

    /// Whether any merged issue is critical or major.
    pub fn has_blocking_issues(&self) -> bool {
        self.merged_issues.iter().any(|m| m.severity().is_blocking())
    }

    /// Consensus score for a criterion (zero when absent).
    pub fn score_for(&self, criterion: Criterion) -> f64 {
        self.criterion_scores.get(&criterion).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliability_buckets() {
        assert_eq!(Reliability::from_agreement(0.80, 0.80, 0.67), Reliability::Reliable);
        assert_eq!(Reliability::from_agreement(0.70, 0.80, 0.67), Reliability::Tentative);
        assert_eq!(Reliability::from_agreement(0.67, 0.80, 0.67), Reliability::Tentative);
        assert_eq!(Reliability::from_agreement(0.2, 0.80, 0.67), Reliability::Low);
        assert_eq!(Reliability::from_agreement(-0.4, 0.80, 0.67), Reliability::Low);
    }

    #[test]
    fn test_reliability_downgrade() {
        assert_eq!(Reliability::Reliable.downgrade(), Reliability::Tentative);
        assert_eq!(Reliability::Tentative.downgrade(), Reliability::Low);
        assert_eq!(Reliability::Low.downgrade(), Reliability::Low);
    }

    #[test]
    fn test_score_for_falls_back_to_overall() {
        let mut verdict = JudgeVerdict::uniform(0.7, Confidence::High);
        verdict.criteria_scores.remove(&Criterion::Clarity);
        assert!((verdict.score_for(Criterion::Clarity) - 0.7).abs() < 1e-12);
        verdict.criteria_scores.insert(Criterion::Engagement, 1.4);
        assert!((verdict.score_for(Criterion::Engagement) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_verdict_deserializes_without_optional_fields() {
        let json = r#"{"overall_score": 0.8, "confidence": "medium"}"#;
        let verdict: JudgeVerdict = serde_json::from_str(json).unwrap();
        assert!(verdict.criteria_scores.is_empty());
        assert!(verdict.issues.is_empty());
        assert_eq!(verdict.confidence, Confidence::Medium);
    }
}
