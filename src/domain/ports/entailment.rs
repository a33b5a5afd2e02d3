//! Entailment port used to verify fixes.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::refinement::Issue;

/// Scores how strongly a revised section entails resolution of an issue.
#[async_trait]
pub trait EntailmentChecker: Send + Sync {
    /// Entailment score in `[0, 1]` that `revised` resolves `issue`'s
    /// suggested fix.
    async fn entailment(&self, revised: &str, issue: &Issue) -> DomainResult<f64>;
}
