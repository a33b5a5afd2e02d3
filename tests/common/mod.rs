//! Shared fakes for integration tests.
//!
//! Lessons carry a `[q=0.70]` marker in one section. Marker judges score the
//! whole lesson at that value, the marker fixer rewrites it on every fix and
//! the marker pipeline bumps it on every regeneration, so each scenario can
//! script its score trajectory through content alone.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use lesson_refinery::domain::errors::{DomainResult, RefinementError};
use lesson_refinery::domain::models::refinement::{
    Confidence, Criterion, FixRecommendation, FocusedRubric, Issue, JudgeReport, JudgeVerdict,
    LessonContent, RegeneratedContent, RevisedSection, Section, SectionFixScope, Severity,
};
use lesson_refinery::domain::ports::{ContentPipeline, FixGenerator, JudgeService};
use lesson_refinery::services::Collaborators;

pub const ISSUE_DESCRIPTION: &str = "The worked example skips the common denominator step";
pub const ISSUE_FIX: &str = "Add a worked example finding the common denominator";

// ---------------------------------------------------------------------------
// Marker helpers
// ---------------------------------------------------------------------------

/// The quality marker in `text`, if any.
pub fn marker(text: &str) -> Option<f64> {
    let start = text.find("[q=")? + 3;
    let end = start + text[start..].find(']')?;
    text[start..end].parse().ok()
}

/// `text` with its quality marker set to `q`.
pub fn with_marker(text: &str, q: f64) -> String {
    let Some(start) = text.find("[q=") else {
        return format!("{text} [q={q:.2}]");
    };
    let end = text[start..].find(']').map_or(text.len(), |i| start + i + 1);
    format!("{}[q={q:.2}]{}", &text[..start], &text[end..])
}

/// Three-section fractions lesson with the marker in `s2`.
pub fn fractions_lesson(q: f64) -> LessonContent {
    LessonContent::new(
        "Adding Fractions",
        vec![
            Section::new(
                "s1",
                "Introduction",
                "A **fraction** has a `numerator` over a denominator.",
            ),
            Section::new(
                "s2",
                "Worked Example",
                format!("To add 1/2 and 1/3 we rewrite both fractions. [q={q:.2}]"),
            )
            .with_reference("s1"),
            Section::new("s3", "Summary", "Fractions add once their denominators match."),
        ],
    )
}

// ---------------------------------------------------------------------------
// Judges
// ---------------------------------------------------------------------------

/// Scores a lesson at its marker value, or at a fixed value when set.
pub struct MarkerJudge {
    id: String,
    fixed: Option<f64>,
    confidence: Confidence,
    /// Scores below this come with one minor clarity issue on `s2`.
    issue_below: f64,
    /// Calls after this many fail with a service error.
    fail_after: Option<u32>,
    pub calls: AtomicU32,
}

impl MarkerJudge {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fixed: None,
            confidence: Confidence::High,
            issue_below: 0.90,
            fail_after: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn fixed(id: &str, score: f64, confidence: Confidence) -> Self {
        Self {
            fixed: Some(score),
            confidence,
            ..Self::new(id)
        }
    }

    /// Answer the first `calls` evaluations, then fail every later one.
    pub fn failing_after(mut self, calls: u32) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JudgeService for MarkerJudge {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(
        &self,
        content: &LessonContent,
        _rubric: &FocusedRubric,
    ) -> DomainResult<JudgeReport> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_after.is_some_and(|limit| call > limit) {
            return Err(RefinementError::service("marker-judge", "503 service unavailable"));
        }
        let score = self
            .fixed
            .or_else(|| marker(&content.render()))
            .ok_or_else(|| RefinementError::service("marker-judge", "no quality marker"))?;

        let mut verdict = JudgeVerdict::uniform(score, self.confidence);
        if score < self.issue_below {
            verdict = verdict.with_issues(vec![Issue::new(
                Criterion::Clarity,
                Severity::Minor,
                "s2",
                ISSUE_DESCRIPTION,
                ISSUE_FIX,
            )]);
        }
        Ok(JudgeReport {
            verdict,
            tokens_used: 100,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixer and pipeline
// ---------------------------------------------------------------------------

/// Rewrites the target section's marker to the next scripted score and
/// appends every suggested fix.
pub struct MarkerFixer {
    scores: Vec<f64>,
    pub calls: AtomicU32,
}

impl MarkerFixer {
    pub fn cycling(scores: &[f64]) -> Self {
        Self {
            scores: scores.to_vec(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FixGenerator for MarkerFixer {
    async fn apply_fix(
        &self,
        scope: &SectionFixScope,
        _recommendation: &FixRecommendation,
    ) -> DomainResult<RevisedSection> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let q = self.scores[call % self.scores.len()];
        let fixes: Vec<&str> = scope.issues.iter().map(|i| i.suggested_fix.as_str()).collect();
        Ok(RevisedSection {
            content: format!("{} {}.", with_marker(&scope.target.body, q), fixes.join(". ")),
            tokens_used: 50,
        })
    }
}

/// Hands every section back unchanged.
pub struct UnchangedFixer;

#[async_trait]
impl FixGenerator for UnchangedFixer {
    async fn apply_fix(
        &self,
        scope: &SectionFixScope,
        _recommendation: &FixRecommendation,
    ) -> DomainResult<RevisedSection> {
        Ok(RevisedSection {
            content: scope.target.body.clone(),
            tokens_used: 50,
        })
    }
}

/// Raises the marker by `step` on every regeneration.
pub struct MarkerPipeline {
    step: f64,
    pub lesson_calls: AtomicU32,
    pub section_calls: AtomicU32,
}

impl MarkerPipeline {
    pub fn stepping(step: f64) -> Self {
        Self {
            step,
            lesson_calls: AtomicU32::new(0),
            section_calls: AtomicU32::new(0),
        }
    }

    fn bump(&self, text: &str) -> String {
        match marker(text) {
            Some(q) => with_marker(text, (q + self.step).min(1.0)),
            None => text.to_string(),
        }
    }
}

#[async_trait]
impl ContentPipeline for MarkerPipeline {
    async fn regenerate_section(&self, scope: &SectionFixScope) -> DomainResult<RevisedSection> {
        self.section_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RevisedSection {
            content: self.bump(&scope.target.body),
            tokens_used: 80,
        })
    }

    async fn regenerate_lesson(&self, previous: &LessonContent) -> DomainResult<RegeneratedContent> {
        self.lesson_calls.fetch_add(1, Ordering::SeqCst);
        let mut content = previous.clone();
        for section in &mut content.sections {
            section.body = self.bump(&section.body);
        }
        Ok(RegeneratedContent {
            content,
            tokens_used: 400,
        })
    }
}

pub fn collaborators(
    judges: Vec<Arc<MarkerJudge>>,
    fixer: Arc<MarkerFixer>,
    pipeline: Arc<MarkerPipeline>,
) -> Collaborators {
    Collaborators {
        judges: judges
            .into_iter()
            .map(|j| j as Arc<dyn JudgeService>)
            .collect(),
        fix_generator: fixer,
        pipeline,
        entailment: None,
    }
}

/// Locators of sections whose bodies differ between two lessons.
pub fn changed_sections(before: &LessonContent, after: &LessonContent) -> BTreeSet<String> {
    before
        .sections
        .iter()
        .zip(&after.sections)
        .filter(|(a, b)| a != b)
        .map(|(a, _)| a.locator.clone())
        .collect()
}
