//! Targeted Fix Executor.
//!
//! Applies a router recommendation to the implicated sections only, then
//! verifies the result in two steps:
//!
//! 1. **Entailment** -- each revised section is checked against the issues
//!    it targeted. Below the flag threshold the section is reverted.
//! 2. **Targeted re-evaluation** -- judges covering the implicated criteria,
//!    plus a few uninvolved canary judges, re-score the edited lesson. Any
//!    quality-lock regression reverts the whole edit.
//!
//! Sections outside the recommendation are never handed to a generator and
//! are carried over by clone, so they come out byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use super::judge_panel::JudgePanel;
use crate::domain::errors::RefinementError;
use crate::domain::models::config::FixConfig;
use crate::domain::models::refinement::{
    location_matches, AnchorExcerpt, Criterion, CriterionRegression, FixRecommendation, FixStatus,
    LessonContent, MergedIssue, QualityLock, SectionFixScope,
};
use crate::domain::ports::{ContentPipeline, EntailmentChecker, FixGenerator};

/// How the implicated sections are rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    /// Targeted edit through the fix generator.
    Targeted,
    /// Section regeneration through the content pipeline.
    Regenerate,
}

/// One fix attempt's inputs.
#[derive(Debug, Clone, Copy)]
pub struct FixRequest<'a> {
    pub content: &'a LessonContent,
    pub mode: FixMode,
    pub recommendation: &'a FixRecommendation,
    /// Pins the re-evaluated scores are checked against.
    pub lock: &'a QualityLock,
    /// Model calls the attempt may make, fix and re-evaluation together.
    pub call_allowance: u32,
}

/// Result of one fix attempt.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    /// Content after the attempt; the input content when the edit was
    /// reverted.
    pub content: LessonContent,
    pub status: FixStatus,
    /// Sections whose edit was kept.
    pub sections_touched: Vec<String>,
    /// Composite from targeted re-evaluation, when it ran.
    pub score_after: Option<f64>,
    pub regressions: Vec<CriterionRegression>,
    pub model_calls: u32,
    pub tokens_used: u64,
    /// Issues resolved by a confirmed edit.
    pub fixed_issues: Vec<MergedIssue>,
    /// Issues whose section was regenerated.
    pub superseded_issues: Vec<MergedIssue>,
    pub failure_reason: Option<String>,
}

impl FixOutcome {
    fn failed(content: &LessonContent, reason: String, model_calls: u32, tokens_used: u64) -> Self {
        Self {
            content: content.clone(),
            status: FixStatus::Failed,
            sections_touched: Vec::new(),
            score_after: None,
            regressions: Vec::new(),
            model_calls,
            tokens_used,
            fixed_issues: Vec::new(),
            superseded_issues: Vec::new(),
            failure_reason: Some(reason),
        }
    }
}

/// Per-section result before re-evaluation.
struct SectionEdit {
    locator: String,
    body: String,
    status: FixStatus,
}

pub struct TargetedFixExecutor {
    fix_generator: Arc<dyn FixGenerator>,
    pipeline: Arc<dyn ContentPipeline>,
    entailment: Arc<dyn EntailmentChecker>,
    config: FixConfig,
}

impl TargetedFixExecutor {
    pub fn new(
        fix_generator: Arc<dyn FixGenerator>,
        pipeline: Arc<dyn ContentPipeline>,
        entailment: Arc<dyn EntailmentChecker>,
        config: FixConfig,
    ) -> Self {
        Self {
            fix_generator,
            pipeline,
            entailment,
            config,
        }
    }

    /// Build the scope handed to a generator for one section: the section
    /// itself, excerpts of the sections it references, and its issues.
    pub fn scope_for(
        &self,
        content: &LessonContent,
        locator: &str,
        recommendation: &FixRecommendation,
    ) -> Option<SectionFixScope> {
        let target = content.section(locator)?.clone();
        let anchors = target
            .references
            .iter()
            .filter(|r| r.as_str() != locator)
            .filter_map(|r| content.section(r))
            .map(|s| AnchorExcerpt {
                locator: s.locator.clone(),
                title: s.title.clone(),
                excerpt: s.excerpt(self.config.anchor_excerpt_chars),
            })
            .collect();
        let issues = recommendation
            .issues_for_section(locator)
            .map(|m| m.issue.clone())
            .collect();
        Some(SectionFixScope {
            target,
            anchors,
            issues,
        })
    }

    /// Apply `recommendation` to `content` and verify it.
    ///
    /// Never makes more than `call_allowance` model calls. Collaborator
    /// failures are reported through [`FixStatus::Failed`], not as errors.
    pub async fn execute<R: Rng + ?Sized>(
        &self,
        request: FixRequest<'_>,
        panel: &JudgePanel,
        rng: &mut R,
    ) -> FixOutcome {
        let FixRequest {
            content,
            mode,
            recommendation,
            lock,
            call_allowance,
        } = request;
        let mut model_calls = 0u32;
        let mut tokens_used = 0u64;
        let mut edits: Vec<SectionEdit> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for locator in &recommendation.sections_to_modify {
            if model_calls >= call_allowance {
                tracing::warn!(section = %locator, "Model-call budget exhausted before fixing section");
                failures.push(format!("{locator}: model-call budget exhausted"));
                continue;
            }
            let Some(scope) = self.scope_for(content, locator, recommendation) else {
                failures.push(format!("{locator}: no such section"));
                continue;
            };

            model_calls += 1;
            match self.rewrite(&scope, mode, recommendation).await {
                Ok((body, tokens, status)) => {
                    tokens_used += tokens;
                    tracing::debug!(section = %locator, status = ?status, "Section rewritten");
                    if status == FixStatus::Failed {
                        failures.push(format!("{locator}: entailment below flag threshold"));
                    } else {
                        edits.push(SectionEdit {
                            locator: locator.clone(),
                            body,
                            status,
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!(section = %locator, error = %err, "Section rewrite failed");
                    failures.push(format!("{locator}: {err}"));
                }
            }
        }

        if edits.is_empty() {
            let reason = RefinementError::FixApplicationFailed(failures.join("; ")).to_string();
            return FixOutcome::failed(content, reason, model_calls, tokens_used);
        }

        let replacements: BTreeMap<String, String> = edits
            .iter()
            .map(|e| (e.locator.clone(), e.body.clone()))
            .collect();
        let revised = match content.replace_sections(&replacements) {
            Ok(revised) => revised,
            Err(err) => return FixOutcome::failed(content, err.to_string(), model_calls, tokens_used),
        };

        // Targeted re-evaluation.
        let implicated = recommendation.implicated_criteria();
        let indices = self.reevaluation_judges(panel, &implicated, rng);
        let focused = panel.aggregator().rubric().restricted_to(&implicated);
        let evaluation = panel
            .evaluate_subset(
                &revised,
                &focused,
                &indices,
                call_allowance.saturating_sub(model_calls),
            )
            .await;
        model_calls += evaluation.model_calls;
        tokens_used += evaluation.tokens_used;

        let verdict = match panel.aggregator().aggregate(&evaluation) {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(error = %err, "Targeted re-evaluation failed; reverting fix");
                return FixOutcome::failed(content, err.to_string(), model_calls, tokens_used);
            }
        };

        let regressions = lock.check(&verdict.criterion_scores);
        let sections_touched: Vec<String> = edits.iter().map(|e| e.locator.clone()).collect();
        if !regressions.is_empty() {
            tracing::warn!(
                regressions = regressions.len(),
                sections = ?sections_touched,
                "Fix regressed locked criteria; reverting"
            );
            return FixOutcome {
                content: content.clone(),
                status: FixStatus::Regressed,
                sections_touched: Vec::new(),
                score_after: Some(verdict.composite_score),
                regressions,
                model_calls,
                tokens_used,
                fixed_issues: Vec::new(),
                superseded_issues: Vec::new(),
                failure_reason: None,
            };
        }

        let status = match mode {
            FixMode::Regenerate => FixStatus::Regenerated,
            FixMode::Targeted if edits.iter().any(|e| e.status == FixStatus::Flagged) => {
                FixStatus::Flagged
            }
            FixMode::Targeted => FixStatus::Confirmed,
        };

        let confirmed: BTreeSet<&str> = edits
            .iter()
            .filter(|e| matches!(e.status, FixStatus::Confirmed | FixStatus::Regenerated))
            .map(|e| e.locator.as_str())
            .collect();
        let resolved: Vec<MergedIssue> = recommendation
            .target_issues
            .iter()
            .filter(|m| {
                let mut sections = recommendation
                    .sections_to_modify
                    .iter()
                    .filter(|s| m.locations.iter().any(|l| location_matches(s, l)))
                    .peekable();
                sections.peek().is_some() && sections.all(|s| confirmed.contains(s.as_str()))
            })
            .cloned()
            .collect();
        let (fixed_issues, superseded_issues) = match mode {
            FixMode::Targeted => (resolved, Vec::new()),
            FixMode::Regenerate => (Vec::new(), resolved),
        };

        tracing::info!(
            status = ?status,
            sections = ?sections_touched,
            score_after = verdict.composite_score,
            failed_sections = failures.len(),
            "Fix verified"
        );

        FixOutcome {
            content: revised,
            status,
            sections_touched,
            score_after: Some(verdict.composite_score),
            regressions: Vec::new(),
            model_calls,
            tokens_used,
            fixed_issues,
            superseded_issues,
            failure_reason: (!failures.is_empty()).then(|| failures.join("; ")),
        }
    }

    /// Rewrite one section and grade it.
    async fn rewrite(
        &self,
        scope: &SectionFixScope,
        mode: FixMode,
        recommendation: &FixRecommendation,
    ) -> Result<(String, u64, FixStatus), RefinementError> {
        match mode {
            FixMode::Regenerate => {
                let revised = self.pipeline.regenerate_section(scope).await?;
                Ok((revised.content, revised.tokens_used, FixStatus::Regenerated))
            }
            FixMode::Targeted => {
                let revised = self.fix_generator.apply_fix(scope, recommendation).await?;
                let mut weakest = 1.0f64;
                for issue in &scope.issues {
                    let score = self.entailment.entailment(&revised.content, issue).await?;
                    weakest = weakest.min(score);
                }
                let status = if weakest >= self.config.entailment_confirm {
                    FixStatus::Confirmed
                } else if weakest >= self.config.entailment_flag {
                    FixStatus::Flagged
                } else {
                    FixStatus::Failed
                };
                tracing::debug!(
                    section = %scope.target.locator,
                    entailment = weakest,
                    "Entailment checked"
                );
                Ok((revised.content, revised.tokens_used, status))
            }
        }
    }

    /// Judges covering the implicated criteria plus up to `canary_count`
    /// uninvolved judges picked at random, in role order.
    fn reevaluation_judges<R: Rng + ?Sized>(
        &self,
        panel: &JudgePanel,
        implicated: &BTreeSet<Criterion>,
        rng: &mut R,
    ) -> Vec<usize> {
        let covering = panel.judges_covering(implicated);
        let others: Vec<usize> = (0..panel.len()).filter(|i| !covering.contains(i)).collect();
        let mut indices: Vec<usize> = covering;
        indices.extend(others.choose_multiple(rng, self.config.canary_count).copied());
        indices.sort_unstable();
        indices
    }
}
