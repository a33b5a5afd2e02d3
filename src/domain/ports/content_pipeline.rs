//! Content-assembly and regeneration port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::refinement::{
    LessonContent, RegeneratedContent, RevisedSection, SectionFixScope,
};

/// The external planner/expander/assembler pipeline.
#[async_trait]
pub trait ContentPipeline: Send + Sync {
    /// Regenerate one section from scratch, keeping its locator.
    async fn regenerate_section(&self, scope: &SectionFixScope) -> DomainResult<RevisedSection>;

    /// Regenerate the whole lesson from the earliest pipeline stage.
    async fn regenerate_lesson(&self, previous: &LessonContent) -> DomainResult<RegeneratedContent>;
}
