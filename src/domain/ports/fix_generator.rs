//! Fix-generation port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::refinement::{FixRecommendation, RevisedSection, SectionFixScope};

/// Rewrites a single section so that its targeted issues are resolved.
#[async_trait]
pub trait FixGenerator: Send + Sync {
    /// Produce a revised body for `scope.target`.
    ///
    /// The generator only ever sees the target section and read-only anchor
    /// excerpts, so it cannot touch preserved sections.
    async fn apply_fix(
        &self,
        scope: &SectionFixScope,
        recommendation: &FixRecommendation,
    ) -> DomainResult<RevisedSection>;
}
