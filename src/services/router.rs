//! Refinement Router.
//!
//! A pure mapping from a round's aggregated verdict, the session history
//! and the current content to one [`RefinementAction`]. Given identical
//! inputs it always returns the identical action.
//!
//! Decision order:
//! 1. Low reliability escalates, whatever the score.
//! 2. Conflicting issue suggestions escalate when configured to.
//! 3. A composite at or above the accept threshold with no quality-lock
//!    regressions is accepted. Issues still open at that score stay in
//!    the ledger and do not block acceptance.
//! 4. Too many consecutive failed or regressed fixes escalate.
//! 5. Otherwise the composite picks a band: minor refine, major refine
//!    (section regeneration) or reject (full regeneration).

use std::collections::BTreeSet;

use crate::domain::models::config::{FixConfig, ThresholdsConfig};
use crate::domain::models::refinement::{
    ActionKind, AggregatedVerdict, CriterionRegression, EscalationReason, FixRecommendation,
    IterationLog, LessonContent, MergedIssue, RefinementAction, Reliability,
};

/// Inputs to one routing decision.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    /// This round's aggregated verdict.
    pub verdict: &'a AggregatedVerdict,
    /// Rounds completed before this one.
    pub history: &'a IterationLog,
    /// Content the verdict was produced for.
    pub content: &'a LessonContent,
    /// Quality-lock violations in this round's evaluation.
    pub regressions: &'a [CriterionRegression],
}

#[derive(Debug, Clone)]
pub struct RefinementRouter {
    thresholds: ThresholdsConfig,
    max_fix_retries: u32,
    max_issues_per_fix: usize,
    escalate_on_conflict: bool,
}

impl RefinementRouter {
    pub fn new(thresholds: ThresholdsConfig, fix: &FixConfig, escalate_on_conflict: bool) -> Self {
        Self {
            thresholds,
            max_fix_retries: fix.max_fix_retries,
            max_issues_per_fix: fix.max_issues_per_fix,
            escalate_on_conflict,
        }
    }

    /// Score band for a composite, ignoring every other signal.
    pub fn band(&self, score: f64) -> ActionKind {
        if score >= self.thresholds.accept {
            ActionKind::Accept
        } else if score >= self.thresholds.minor {
            ActionKind::MinorRefine
        } else if score >= self.thresholds.major {
            ActionKind::MajorRefine
        } else {
            ActionKind::Reject
        }
    }

    pub fn route(&self, ctx: &RoutingContext<'_>) -> RefinementAction {
        let verdict = ctx.verdict;

        if verdict.reliability == Reliability::Low {
            return RefinementAction::Escalate {
                reason: EscalationReason::LowReliability,
            };
        }

        if self.escalate_on_conflict && !verdict.conflicts.is_empty() {
            let locations: BTreeSet<String> =
                verdict.conflicts.iter().map(|c| c.location.clone()).collect();
            return RefinementAction::Escalate {
                reason: EscalationReason::ConflictingIssues {
                    locations: locations.into_iter().collect(),
                },
            };
        }

        let band = self.band(verdict.composite_score);
        if band == ActionKind::Accept && ctx.regressions.is_empty() {
            return RefinementAction::Accept;
        }

        let failed = ctx.history.consecutive_failed_fixes() + u32::from(!ctx.regressions.is_empty());
        if failed > self.max_fix_retries {
            let reason = if ctx.regressions.is_empty() {
                EscalationReason::FixRetriesExhausted { attempts: failed }
            } else {
                EscalationReason::RegressionDetected
            };
            return RefinementAction::Escalate { reason };
        }

        match band {
            ActionKind::Reject => RefinementAction::Reject,
            ActionKind::MajorRefine => {
                let blocking: Vec<&MergedIssue> = verdict
                    .merged_issues
                    .iter()
                    .filter(|m| m.severity().is_blocking())
                    .collect();
                if blocking.is_empty() {
                    self.minor(ctx, verdict.merged_issues.iter().collect())
                } else {
                    match self.recommend(ctx.content, blocking) {
                        Some(recommendation) => RefinementAction::MajorRefine { recommendation },
                        None => no_actionable(),
                    }
                }
            }
            // Accept band with a regression falls through to a targeted fix.
            _ => self.minor(ctx, verdict.merged_issues.iter().collect()),
        }
    }

    fn minor(&self, ctx: &RoutingContext<'_>, issues: Vec<&MergedIssue>) -> RefinementAction {
        match self.recommend(ctx.content, issues) {
            Some(recommendation) => RefinementAction::MinorRefine { recommendation },
            None if !ctx.regressions.is_empty() => RefinementAction::Escalate {
                reason: EscalationReason::RegressionDetected,
            },
            None => no_actionable(),
        }
    }

    /// Scope a fix to the sections the given issues point into.
    ///
    /// Issues whose location resolves to no section are left out. Returns
    /// `None` when nothing is left to fix.
    fn recommend(&self, content: &LessonContent, issues: Vec<&MergedIssue>) -> Option<FixRecommendation> {
        let mut targets: Vec<MergedIssue> = Vec::new();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for merged in issues {
            if targets.len() >= self.max_issues_per_fix {
                break;
            }
            let sections: Vec<String> = merged
                .locations
                .iter()
                .filter_map(|loc| content.section_for_location(loc))
                .map(|s| s.locator.clone())
                .collect();
            if sections.is_empty() {
                continue;
            }
            touched.extend(sections);
            targets.push(merged.clone());
        }

        if targets.is_empty() {
            return None;
        }

        let (sections_to_modify, sections_to_preserve): (Vec<String>, Vec<String>) = content
            .locators()
            .into_iter()
            .partition(|locator| touched.contains(locator));

        Some(FixRecommendation {
            target_issues: targets,
            sections_to_modify,
            sections_to_preserve,
            preserve_terminology: defined_terms(content),
        })
    }
}

const fn no_actionable() -> RefinementAction {
    RefinementAction::Escalate {
        reason: EscalationReason::NoActionableIssues,
    }
}

/// Terms the lesson defines: `**bold**` and `` `code` `` spans, in first
/// appearance order.
pub fn defined_terms(content: &LessonContent) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut terms = Vec::new();
    for section in &content.sections {
        for term in delimited(&section.body, "**").chain(delimited(&section.body, "`")) {
            let term = term.trim();
            if !term.is_empty() && seen.insert(term.to_string()) {
                terms.push(term.to_string());
            }
        }
    }
    terms
}

/// Spans enclosed by `delimiter` pairs.
fn delimited<'a>(text: &'a str, delimiter: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    text.split(delimiter).skip(1).step_by(2)
}
