//! Judge-evaluation port.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::refinement::{Criterion, FocusedRubric, JudgeReport, LessonContent};

/// An evaluator producing one verdict per call.
#[async_trait]
pub trait JudgeService: Send + Sync {
    /// Stable identifier, used for weighting and logging.
    fn id(&self) -> &str;

    /// Criteria this judge is competent to score.
    ///
    /// Targeted re-evaluation only re-runs judges whose criteria intersect
    /// the implicated ones.
    fn criteria(&self) -> BTreeSet<Criterion> {
        Criterion::ALL.into_iter().collect()
    }

    /// Score `content` against `rubric`.
    ///
    /// When `rubric.focus` is non-empty the judge should concentrate on those
    /// criteria but may still score the rest.
    async fn evaluate(&self, content: &LessonContent, rubric: &FocusedRubric)
        -> DomainResult<JudgeReport>;
}
