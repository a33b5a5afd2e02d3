//! Quality lock: a regression guard over previously passing criteria.
//!
//! Once a criterion reaches the lock threshold in a confirmed round it is
//! pinned at the highest score confirmed so far. Any later round reporting
//! that criterion more than `tolerance` below its pin is a regression.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::criterion::Criterion;

/// A locked criterion that dropped too far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionRegression {
    pub criterion: Criterion,
    pub locked_score: f64,
    pub observed_score: f64,
}

impl CriterionRegression {
    pub fn drop(&self) -> f64 {
        self.locked_score - self.observed_score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLock {
    lock_threshold: f64,
    tolerance: f64,
    locked: BTreeMap<Criterion, f64>,
}

impl QualityLock {
    pub fn new(lock_threshold: f64, tolerance: f64) -> Self {
        Self {
            lock_threshold,
            tolerance,
            locked: BTreeMap::new(),
        }
    }

    /// Pin criteria from a confirmed round.
    ///
    /// Pins only ever rise. Callers must run [`check`](Self::check) first;
    /// confirming a regressed round is a logic error on their side.
    pub fn confirm(&mut self, scores: &BTreeMap<Criterion, f64>) {
        for (criterion, score) in scores {
            if *score < self.lock_threshold {
                continue;
            }
            self.locked
                .entry(*criterion)
                .and_modify(|pinned| *pinned = pinned.max(*score))
                .or_insert(*score);
        }
    }

    /// Locked criteria in `scores` that fell more than the tolerance below
    /// their pin. Criteria absent from `scores` are not judged.
    pub fn check(&self, scores: &BTreeMap<Criterion, f64>) -> Vec<CriterionRegression> {
        self.locked
            .iter()
            .filter_map(|(criterion, locked)| {
                let observed = *scores.get(criterion)?;
                (locked - observed > self.tolerance).then_some(CriterionRegression {
                    criterion: *criterion,
                    locked_score: *locked,
                    observed_score: observed,
                })
            })
            .collect()
    }

    /// Current pin of a criterion.
    pub fn locked_score(&self, criterion: Criterion) -> Option<f64> {
        self.locked.get(&criterion).copied()
    }

    pub fn locked(&self) -> &BTreeMap<Criterion, f64> {
        &self.locked
    }

    pub const fn tolerance(&self) -> f64 {
        self.tolerance
    }
}
