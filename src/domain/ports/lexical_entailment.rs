//! Lexical entailment checker.
//!
//! Used when no NLI model is wired in. Measures how much of the suggested
//! fix's vocabulary the revision now carries and whether the quoted
//! offending passage is gone.

use async_trait::async_trait;

use super::entailment::EntailmentChecker;
use crate::domain::errors::DomainResult;
use crate::domain::models::refinement::similarity::{content_words, normalize};
use crate::domain::models::refinement::Issue;

#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalEntailment;

impl LexicalEntailment {
    pub const fn new() -> Self {
        Self
    }

    /// Synchronous scoring shared by the async port.
    pub fn score(revised: &str, issue: &Issue) -> f64 {
        let wanted = content_words(&issue.suggested_fix);
        let coverage = if wanted.is_empty() {
            1.0
        } else {
            let present = content_words(revised);
            wanted.intersection(&present).count() as f64 / wanted.len() as f64
        };

        match &issue.quoted_text {
            Some(quote) if !quote.trim().is_empty() => {
                let removed = !normalize(revised).contains(&normalize(quote));
                0.5 * coverage + if removed { 0.5 } else { 0.0 }
            }
            _ => coverage,
        }
    }
}

#[async_trait]
impl EntailmentChecker for LexicalEntailment {
    async fn entailment(&self, revised: &str, issue: &Issue) -> DomainResult<f64> {
        Ok(Self::score(revised, issue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::refinement::{Criterion, Severity};

    fn issue(fix: &str) -> Issue {
        Issue::new(Criterion::Clarity, Severity::Minor, "s1", "unclear", fix)
    }

    #[test]
    fn test_full_coverage_confirms() {
        let score = LexicalEntailment::score(
            "We define the denominator with a worked example: 3/4 has four equal parts.",
            &issue("Define denominator with a worked example"),
        );
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_coverage_fails() {
        let score = LexicalEntailment::score("Nothing relevant here.", &issue("Define denominator"));
        assert!(score < 1e-9);
    }

    #[test]
    fn test_quote_removal_counts_half() {
        let quoted = issue("Define denominator").with_quote("the bottom thing");
        let kept = LexicalEntailment::score("We define the bottom thing as the denominator.", &quoted);
        let removed = LexicalEntailment::score("We define the denominator as the count of parts.", &quoted);
        assert!((kept - 0.5).abs() < 1e-9);
        assert!((removed - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_port_delegates_to_score() {
        let checker = LexicalEntailment::new();
        let value = checker
            .entailment("Define every term.", &issue("Define term"))
            .await
            .unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }
}
