//! Inter-rater agreement over judge scores.
//!
//! Agreement follows Krippendorff's alpha for interval data:
//! `alpha = 1 - D_o / D_e`. With one item per round there is no pooled
//! sample to estimate the expected disagreement from, so `D_e` is fixed at
//! the expected squared difference of two independent uniform scores on
//! `[0, 1]`, which is `1/6`.

use std::collections::BTreeMap;

use crate::domain::models::refinement::{Criterion, Rubric, TaggedVerdict};

/// Expected squared difference of two independent `U(0, 1)` scores.
pub const EXPECTED_DISAGREEMENT: f64 = 1.0 / 6.0;

/// Agreement among a set of scores, in `[-1, 1]`.
///
/// Fewer than two scores carry no disagreement and yield 1.0.
pub fn score_agreement(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 1.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in scores.iter().enumerate() {
        for b in &scores[i + 1..] {
            total += (a - b).powi(2);
            pairs += 1;
        }
    }
    let observed = total / pairs as f64;

    (1.0 - observed / EXPECTED_DISAGREEMENT).clamp(-1.0, 1.0)
}

/// Agreement per rubric criterion across the responding judges.
pub fn per_criterion_agreement(
    verdicts: &[TaggedVerdict],
    rubric: &Rubric,
) -> BTreeMap<Criterion, f64> {
    rubric
        .criteria()
        .map(|(criterion, _)| {
            let scores: Vec<f64> = verdicts
                .iter()
                .map(|v| v.verdict.score_for(criterion))
                .collect();
            (criterion, score_agreement(&scores))
        })
        .collect()
}

/// Rubric-weighted mean of per-criterion agreement.
pub fn overall_agreement(per_criterion: &BTreeMap<Criterion, f64>, rubric: &Rubric) -> f64 {
    let (sum, weight) = per_criterion
        .iter()
        .fold((0.0, 0.0), |(sum, weight), (criterion, agreement)| {
            let w = rubric.weight(*criterion);
            (sum + w * agreement, weight + w)
        });
    if weight > 0.0 {
        sum / weight
    } else {
        1.0
    }
}

/// Median of a non-empty slice. Returns 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Weighted mean of `(value, weight)` pairs. Falls back to the plain mean
/// when the weights sum to zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total_weight > 0.0 {
        pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight
    } else {
        pairs.iter().map(|(v, _)| v).sum::<f64>() / pairs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_scores_agree() {
        let alpha = score_agreement(&[0.95, 0.93, 0.91]);
        assert!((alpha - 0.9952).abs() < 1e-4, "alpha = {alpha}");
    }

    #[test]
    fn test_split_scores_disagree() {
        let alpha = score_agreement(&[0.95, 0.55, 0.54]);
        assert!((alpha - 0.3436).abs() < 1e-3, "alpha = {alpha}");
    }

    #[test]
    fn test_extreme_disagreement_clamped() {
        assert!((score_agreement(&[0.0, 1.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_score_agrees() {
        assert!((score_agreement(&[0.4]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_median() {
        assert!((median(&[0.95, 0.55, 0.54]) - 0.55).abs() < 1e-12);
        assert!((median(&[0.2, 0.4]) - 0.3).abs() < 1e-12);
        assert!(median(&[]).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mean() {
        assert!((weighted_mean(&[(0.8, 3.0), (0.4, 1.0)]) - 0.7).abs() < 1e-12);
        assert!((weighted_mean(&[(0.8, 0.0), (0.4, 0.0)]) - 0.6).abs() < 1e-12);
    }
}
