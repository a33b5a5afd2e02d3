//! Evaluator Aggregator.
//!
//! Turns the verdicts of one panel pass into a single
//! [`AggregatedVerdict`]. Aggregation is a pure function of its inputs: the
//! same panel evaluation always yields the same verdict.

use std::collections::BTreeMap;

use super::agreement::{median, overall_agreement, per_criterion_agreement, weighted_mean};
use crate::domain::errors::{DomainResult, RefinementError};
use crate::domain::models::config::AggregationConfig;
use crate::domain::models::refinement::similarity::bigram_jaccard;
use crate::domain::models::refinement::{
    AggregatedVerdict, Criterion, IssueConflict, JudgeVerdict, MergedIssue, PanelEvaluation,
    Reliability, Rubric, TaggedVerdict,
};

const EXPAND_WORDS: &[&str] = &[
    "add", "expand", "include", "elaborate", "extend", "introduce", "insert", "more", "lengthen",
];
const CONDENSE_WORDS: &[&str] = &[
    "remove", "shorten", "cut", "trim", "condense", "delete", "reduce", "drop", "fewer", "less",
];

/// Direction a suggested fix pushes the amount of material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditDirection {
    Expand,
    Condense,
}

fn edit_direction(suggestion: &str) -> Option<EditDirection> {
    let words: Vec<String> = suggestion
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .collect();
    let expands = words.iter().any(|w| EXPAND_WORDS.contains(&w.as_str()));
    let condenses = words.iter().any(|w| CONDENSE_WORDS.contains(&w.as_str()));
    match (expands, condenses) {
        (true, false) => Some(EditDirection::Expand),
        (false, true) => Some(EditDirection::Condense),
        _ => None,
    }
}

/// Location with any `#fragment` stripped.
fn base_location(location: &str) -> &str {
    location.split('#').next().unwrap_or(location)
}

/// Combines judge verdicts into an aggregated verdict.
#[derive(Debug, Clone)]
pub struct EvaluatorAggregator {
    rubric: Rubric,
    config: AggregationConfig,
}

impl EvaluatorAggregator {
    pub const fn new(rubric: Rubric, config: AggregationConfig) -> Self {
        Self { rubric, config }
    }

    pub const fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub const fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Rubric-weighted composite of a single judge's verdict.
    pub fn judge_composite(&self, verdict: &JudgeVerdict) -> f64 {
        let scores: BTreeMap<Criterion, f64> = self
            .rubric
            .criteria()
            .map(|(c, _)| (c, verdict.score_for(c)))
            .collect();
        self.rubric.composite(&scores, verdict.overall_score)
    }

    /// Whether two judge composites are far enough apart to need a
    /// tiebreaker.
    pub fn needs_tiebreak(&self, first: f64, second: f64) -> bool {
        (first - second).abs() > self.config.tiebreak_disagreement
    }

    /// Aggregate one panel pass.
    ///
    /// Fails with [`RefinementError::JudgeUnavailable`] when fewer judges
    /// responded than the configured quorum; the caller must escalate
    /// rather than guess.
    pub fn aggregate(&self, panel: &PanelEvaluation) -> DomainResult<AggregatedVerdict> {
        let required = self.config.quorum.max(1);
        if panel.responded() < required {
            return Err(RefinementError::JudgeUnavailable {
                failed: panel.failures.iter().map(|f| f.judge_id.clone()).collect(),
                responded: panel.responded(),
                required,
            });
        }

        let verdicts = &panel.verdicts;
        let use_median = panel.tiebreak_invoked && verdicts.len() >= 3;

        let judge_composites: BTreeMap<String, f64> = verdicts
            .iter()
            .map(|v| (v.judge_id.clone(), self.judge_composite(&v.verdict)))
            .collect();

        let criterion_scores: BTreeMap<Criterion, f64> = self
            .rubric
            .criteria()
            .map(|(criterion, _)| {
                let score = if use_median {
                    let scores: Vec<f64> =
                        verdicts.iter().map(|v| v.verdict.score_for(criterion)).collect();
                    median(&scores)
                } else {
                    let pairs: Vec<(f64, f64)> = verdicts
                        .iter()
                        .map(|v| (v.verdict.score_for(criterion), v.weight))
                        .collect();
                    weighted_mean(&pairs)
                };
                (criterion, score)
            })
            .collect();

        let composite_score = self.rubric.composite(&criterion_scores, 0.0);

        let per_criterion_agreement = per_criterion_agreement(verdicts, &self.rubric);
        let agreement = overall_agreement(&per_criterion_agreement, &self.rubric);

        let mut reliability = match verdicts.as_slice() {
            [only] => Reliability::from_confidence(only.verdict.confidence),
            _ => Reliability::from_agreement(
                agreement,
                self.config.reliable_agreement,
                self.config.tentative_agreement,
            ),
        };
        if !panel.failures.is_empty() {
            reliability = reliability.downgrade();
        }

        let merged_issues = self.prioritize(self.merge_issues(verdicts));
        let conflicts = detect_conflicts(&merged_issues);

        Ok(AggregatedVerdict {
            composite_score,
            criterion_scores,
            per_criterion_agreement,
            overall_agreement: agreement,
            merged_issues,
            reliability,
            conflicts,
            judge_composites,
            judges_failed: panel.failures.iter().map(|f| f.judge_id.clone()).collect(),
            tiebreak_invoked: panel.tiebreak_invoked,
        })
    }

    /// Fold near-duplicate issues together.
    ///
    /// Two issues merge when they share a criterion and their descriptions
    /// are more similar than `dedup_similarity`.
    fn merge_issues(&self, verdicts: &[TaggedVerdict]) -> Vec<MergedIssue> {
        let mut merged: Vec<MergedIssue> = Vec::new();
        for tagged in verdicts {
            for issue in &tagged.verdict.issues {
                let existing = merged.iter_mut().find(|m| {
                    m.issue.criterion == issue.criterion
                        && bigram_jaccard(&m.issue.description, &issue.description)
                            > self.config.dedup_similarity
                });
                match existing {
                    Some(m) => m.absorb(issue, &tagged.judge_id),
                    None => merged.push(MergedIssue::from_issue(issue.clone(), &tagged.judge_id)),
                }
            }
        }
        merged
    }

    /// Order issues by severity, then criterion weight, then agreement
    /// count, then location and description.
    fn prioritize(&self, mut issues: Vec<MergedIssue>) -> Vec<MergedIssue> {
        issues.sort_by(|a, b| {
            b.severity()
                .cmp(&a.severity())
                .then_with(|| {
                    self.rubric
                        .weight(b.criterion())
                        .total_cmp(&self.rubric.weight(a.criterion()))
                })
                .then_with(|| b.agreement_count().cmp(&a.agreement_count()))
                .then_with(|| a.issue.location.cmp(&b.issue.location))
                .then_with(|| a.issue.description.cmp(&b.issue.description))
        });
        issues
    }
}

/// Pairs of issues at one location, raised by different judges, whose
/// suggestions pull in opposite directions.
fn detect_conflicts(issues: &[MergedIssue]) -> Vec<IssueConflict> {
    let mut conflicts = Vec::new();
    for (i, a) in issues.iter().enumerate() {
        for b in &issues[i + 1..] {
            if !a.supporting_judges.is_disjoint(&b.supporting_judges) {
                continue;
            }
            let shared = a.locations.iter().map(|l| base_location(l)).find(|la| {
                b.locations.iter().any(|lb| base_location(lb) == *la)
            });
            let Some(location) = shared else {
                continue;
            };

            let (expand, condense) = match (
                edit_direction(&a.issue.suggested_fix),
                edit_direction(&b.issue.suggested_fix),
            ) {
                (Some(EditDirection::Expand), Some(EditDirection::Condense)) => (a, b),
                (Some(EditDirection::Condense), Some(EditDirection::Expand)) => (b, a),
                _ => continue,
            };

            conflicts.push(IssueConflict {
                location: location.to_string(),
                expand: expand.issue.suggested_fix.clone(),
                condense: condense.issue.suggested_fix.clone(),
                judges: a
                    .supporting_judges
                    .union(&b.supporting_judges)
                    .cloned()
                    .collect(),
            });
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::refinement::{
        Confidence, Issue, JudgeFailure, JudgeFailureKind, JudgeRole, Severity,
    };

    fn tagged(id: &str, role: JudgeRole, verdict: JudgeVerdict) -> TaggedVerdict {
        TaggedVerdict {
            judge_id: id.to_string(),
            role,
            weight: 1.0,
            verdict,
        }
    }

    fn aggregator() -> EvaluatorAggregator {
        EvaluatorAggregator::new(Rubric::default(), AggregationConfig::default())
    }

    fn panel(scores: &[f64], tiebreak: bool) -> PanelEvaluation {
        let roles = [JudgeRole::Cheap, JudgeRole::Primary, JudgeRole::Tiebreaker];
        PanelEvaluation {
            verdicts: scores
                .iter()
                .zip(roles)
                .enumerate()
                .map(|(i, (s, role))| {
                    tagged(&format!("j{i}"), role, JudgeVerdict::uniform(*s, Confidence::High))
                })
                .collect(),
            failures: Vec::new(),
            tiebreak_invoked: tiebreak,
            model_calls: scores.len() as u32,
            tokens_used: 0,
        }
    }

    // -- composite and consensus --

    #[test]
    fn test_close_panel_is_reliable() {
        let verdict = aggregator().aggregate(&panel(&[0.95, 0.93, 0.91], false)).unwrap();
        assert!((verdict.composite_score - 0.93).abs() < 1e-9);
        assert_eq!(verdict.reliability, Reliability::Reliable);
        assert!(verdict.merged_issues.is_empty());
    }

    #[test]
    fn test_tiebreak_uses_median_and_stays_low() {
        let verdict = aggregator().aggregate(&panel(&[0.95, 0.55, 0.54], true)).unwrap();
        assert!((verdict.composite_score - 0.55).abs() < 1e-9);
        assert_eq!(verdict.reliability, Reliability::Low);
        assert!(verdict.tiebreak_invoked);
    }

    #[test]
    fn test_judge_weights_shift_mean() {
        let mut evaluation = panel(&[0.9, 0.6], false);
        evaluation.verdicts[0].weight = 3.0;
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert!((verdict.composite_score - 0.825).abs() < 1e-9);
    }

    #[test]
    fn test_composite_is_weighted_sum_of_consensus() {
        let rubric = Rubric::default();
        let verdict = aggregator().aggregate(&panel(&[0.8, 0.7], false)).unwrap();
        let recomputed = rubric.composite(&verdict.criterion_scores, 0.0);
        assert!((verdict.composite_score - recomputed).abs() < 1e-12);
    }

    // -- reliability --

    #[test]
    fn test_single_judge_reliability_follows_confidence() {
        let mut evaluation = panel(&[0.8], false);
        evaluation.verdicts[0].verdict.confidence = Confidence::Medium;
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert_eq!(verdict.reliability, Reliability::Tentative);
    }

    #[test]
    fn test_failure_downgrades_reliability() {
        let mut evaluation = panel(&[0.92, 0.91], false);
        evaluation.failures.push(JudgeFailure {
            judge_id: "j2".to_string(),
            role: JudgeRole::Tiebreaker,
            kind: JudgeFailureKind::TimedOut,
        });
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert_eq!(verdict.reliability, Reliability::Tentative);
        assert_eq!(verdict.judges_failed, vec!["j2".to_string()]);
    }

    #[test]
    fn test_all_judges_failed_is_error() {
        let evaluation = PanelEvaluation {
            failures: vec![JudgeFailure {
                judge_id: "cheap".to_string(),
                role: JudgeRole::Cheap,
                kind: JudgeFailureKind::Error("503".to_string()),
            }],
            model_calls: 1,
            ..PanelEvaluation::default()
        };
        let err = aggregator().aggregate(&evaluation).unwrap_err();
        assert!(matches!(
            err,
            RefinementError::JudgeUnavailable { responded: 0, required: 1, .. }
        ));
    }

    // -- issues --

    #[test]
    fn test_similar_issues_merge_with_highest_severity() {
        let mut evaluation = panel(&[0.8, 0.8], false);
        evaluation.verdicts[0].verdict.issues = vec![Issue::new(
            Criterion::Clarity,
            Severity::Minor,
            "s2",
            "The term denominator is never defined",
            "Define denominator",
        )];
        evaluation.verdicts[1].verdict.issues = vec![Issue::new(
            Criterion::Clarity,
            Severity::Major,
            "s2#p1",
            "Term denominator never defined",
            "Add a definition of denominator",
        )];
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert_eq!(verdict.merged_issues.len(), 1);
        let merged = &verdict.merged_issues[0];
        assert_eq!(merged.severity(), Severity::Major);
        assert_eq!(merged.agreement_count(), 2);
    }

    #[test]
    fn test_different_criteria_do_not_merge() {
        let mut evaluation = panel(&[0.8, 0.8], false);
        let description = "The term denominator is never defined";
        evaluation.verdicts[0].verdict.issues =
            vec![Issue::new(Criterion::Clarity, Severity::Minor, "s2", description, "x")];
        evaluation.verdicts[1].verdict.issues =
            vec![Issue::new(Criterion::Completeness, Severity::Minor, "s2", description, "x")];
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert_eq!(verdict.merged_issues.len(), 2);
    }

    #[test]
    fn test_issue_priority_order() {
        let mut evaluation = panel(&[0.7], false);
        evaluation.verdicts[0].verdict.issues = vec![
            Issue::new(Criterion::Engagement, Severity::Minor, "s1", "dull opening", "x"),
            Issue::new(Criterion::Clarity, Severity::Major, "s2", "confusing notation", "x"),
            Issue::new(Criterion::FactualAccuracy, Severity::Minor, "s3", "wrong date", "x"),
            Issue::new(Criterion::Engagement, Severity::Critical, "s4", "no activity at all", "x"),
        ];
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        let order: Vec<&str> = verdict
            .merged_issues
            .iter()
            .map(|m| m.issue.location.as_str())
            .collect();
        assert_eq!(order, vec!["s4", "s2", "s3", "s1"]);
    }

    #[test]
    fn test_conflicting_suggestions_detected() {
        let mut evaluation = panel(&[0.8, 0.8], false);
        evaluation.verdicts[0].verdict.issues = vec![Issue::new(
            Criterion::Engagement,
            Severity::Minor,
            "s2",
            "Section lacks concrete examples",
            "Add two worked examples",
        )];
        evaluation.verdicts[1].verdict.issues = vec![Issue::new(
            Criterion::Clarity,
            Severity::Minor,
            "s2#p3",
            "Section is too long for the audience",
            "Shorten the section",
        )];
        let verdict = aggregator().aggregate(&evaluation).unwrap();
        assert_eq!(verdict.conflicts.len(), 1);
        assert_eq!(verdict.conflicts[0].location, "s2");
        assert_eq!(verdict.conflicts[0].expand, "Add two worked examples");
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let mut evaluation = panel(&[0.9, 0.6, 0.62], true);
        evaluation.verdicts[1].verdict.issues = vec![Issue::new(
            Criterion::Clarity,
            Severity::Minor,
            "s1",
            "jargon",
            "Define it",
        )];
        let agg = aggregator();
        assert_eq!(agg.aggregate(&evaluation).unwrap(), agg.aggregate(&evaluation).unwrap());
    }

    #[test]
    fn test_edit_direction() {
        assert_eq!(edit_direction("Add an example"), Some(EditDirection::Expand));
        assert_eq!(edit_direction("Cut this paragraph"), Some(EditDirection::Condense));
        assert_eq!(edit_direction("Add one example and remove two"), None);
        assert_eq!(edit_direction("Rephrase"), None);
    }
}
