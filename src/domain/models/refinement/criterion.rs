//! Evaluation criteria and the weighted rubric.
//!
//! Every judge scores content against the same fixed set of [`Criterion`]
//! values. The [`Rubric`] attaches a static weight to each criterion; the
//! weights always sum to 1.0 and the rubric is the only place a composite
//! score is ever computed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;

/// Tolerance used when checking that rubric weights sum to 1.0.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Criterion
// ---------------------------------------------------------------------------

/// One quality dimension judges score lesson content against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    /// Does the lesson serve its stated learning objectives?
    LearningObjectiveAlignment,
    /// Is the lesson sequenced and scaffolded sensibly?
    PedagogicalStructure,
    /// Are the claims correct?
    FactualAccuracy,
    /// Is the prose understandable by the target audience?
    Clarity,
    /// Does the lesson hold attention?
    Engagement,
    /// Are all required topics covered?
    Completeness,
}

impl Criterion {
    /// All criteria in canonical order.
    pub const ALL: [Self; 6] = [
        Self::LearningObjectiveAlignment,
        Self::PedagogicalStructure,
        Self::FactualAccuracy,
        Self::Clarity,
        Self::Engagement,
        Self::Completeness,
    ];

    /// Stable kebab-case name, identical to the serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LearningObjectiveAlignment => "learning-objective-alignment",
            Self::PedagogicalStructure => "pedagogical-structure",
            Self::FactualAccuracy => "factual-accuracy",
            Self::Clarity => "clarity",
            Self::Engagement => "engagement",
            Self::Completeness => "completeness",
        }
    }

    /// Default weight used when no rubric is configured.
    pub const fn default_weight(&self) -> f64 {
        match self {
            Self::LearningObjectiveAlignment => 0.25,
            Self::PedagogicalStructure | Self::FactualAccuracy => 0.20,
            Self::Clarity => 0.15,
            Self::Engagement | Self::Completeness => 0.10,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Rubric
// ---------------------------------------------------------------------------

/// Static criterion weights shared read-only by every session.
///
/// Constructed through [`Rubric::new`], which rejects weight tables that do
/// not sum to 1.0. Criteria absent from the table carry weight zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    weights: BTreeMap<Criterion, f64>,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            weights: Criterion::ALL
                .iter()
                .map(|c| (*c, c.default_weight()))
                .collect(),
        }
    }
}

impl Rubric {
    /// Build a rubric from a weight table, validating it.
    pub fn new(weights: BTreeMap<Criterion, f64>) -> Result<Self, ConfigError> {
        validate_weights(&weights)?;
        Ok(Self { weights })
    }

    /// Weight of a criterion (zero when absent).
    pub fn weight(&self, criterion: Criterion) -> f64 {
        self.weights.get(&criterion).copied().unwrap_or(0.0)
    }

    /// Iterate over the weighted criteria in canonical order.
    pub fn criteria(&self) -> impl Iterator<Item = (Criterion, f64)> + '_ {
        self.weights.iter().map(|(c, w)| (*c, *w))
    }

    /// The weight table.
    pub fn weights(&self) -> &BTreeMap<Criterion, f64> {
        &self.weights
    }

    /// Weighted sum of per-criterion scores.
    ///
    /// A criterion missing from `scores` falls back to `fallback`. This is the
    /// only composite computation in the crate; composites are never carried
    /// between rounds.
    pub fn composite(&self, scores: &BTreeMap<Criterion, f64>, fallback: f64) -> f64 {
        self.weights
            .iter()
            .map(|(c, w)| w * scores.get(c).copied().unwrap_or(fallback))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }

    /// The subset of criteria a targeted re-evaluation should focus on.
    ///
    /// Weights are left untouched so composites stay comparable with full
    /// evaluations; only the focus set changes.
    pub fn restricted_to(&self, criteria: &BTreeSet<Criterion>) -> FocusedRubric {
        FocusedRubric {
            rubric: self.clone(),
            focus: criteria.clone(),
        }
    }
}

/// A rubric with a focus subset, handed to judges during targeted
/// re-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusedRubric {
    /// The full rubric.
    pub rubric: Rubric,
    /// Criteria the judge should concentrate on. Empty means all.
    pub focus: BTreeSet<Criterion>,
}

impl From<Rubric> for FocusedRubric {
    fn from(rubric: Rubric) -> Self {
        Self {
            rubric,
            focus: BTreeSet::new(),
        }
    }
}

/// Validate a raw weight table.
pub fn validate_weights(weights: &BTreeMap<Criterion, f64>) -> Result<(), ConfigError> {
    for (criterion, weight) in weights {
        if !(0.0..=1.0).contains(weight) || weight.is_nan() {
            return Err(ConfigError::WeightOutOfRange {
                criterion: criterion.to_string(),
                weight: *weight,
            });
        }
    }

    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
        return Err(ConfigError::WeightsDoNotSumToOne(sum));
    }

    Ok(())
}
