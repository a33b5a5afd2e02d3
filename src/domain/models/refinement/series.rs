//! Score-series analysis: improvement, plateau and oscillation.

/// Margin by which an autocorrelation must exceed its threshold to count.
/// Keeps a statistic sitting exactly on the threshold from firing through
/// rounding.
pub const AUTOCORRELATION_EPSILON: f64 = 1e-9;

/// Absolute and relative change from `previous` to `current`.
///
/// The relative change is taken against `previous`; when `previous` is zero
/// it is zero for no change and infinite otherwise.
pub fn improvement(previous: f64, current: f64) -> (f64, f64) {
    let delta = current - previous;
    let relative = if previous.abs() > f64::EPSILON {
        delta / previous.abs()
    } else if delta.abs() > f64::EPSILON {
        f64::INFINITY.copysign(delta)
    } else {
        0.0
    };
    (delta, relative)
}

/// Whether the move from `previous` to `current` is a plateau: both the
/// absolute and the relative change are below their epsilons.
pub fn is_plateau(previous: f64, current: f64, epsilon_abs: f64, epsilon_rel: f64) -> bool {
    let (delta, relative) = improvement(previous, current);
    delta.abs() < epsilon_abs && relative.abs() < epsilon_rel
}

/// Sample autocorrelation at `lag`, with the `n / (n - lag)` small-sample
/// adjustment.
///
/// Returns `None` when the series is too short for the lag or has no
/// variance.
pub fn lag_autocorrelation(series: &[f64], lag: usize) -> Option<f64> {
    let n = series.len();
    if lag == 0 || n <= lag {
        return None;
    }

    let mean = series.iter().sum::<f64>() / n as f64;
    let variance = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
    if variance <= f64::EPSILON {
        return None;
    }

    let covariance = series
        .windows(lag + 1)
        .map(|w| (w[0] - mean) * (w[lag] - mean))
        .sum::<f64>()
        / (n - lag) as f64;

    Some(covariance / variance)
}

/// Lag-2 autocorrelation over the trailing `window` scores, if it exceeds
/// `threshold`.
///
/// Needs at least `min_len` scores in the window.
pub fn detect_oscillation(
    series: &[f64],
    window: usize,
    min_len: usize,
    threshold: f64,
) -> Option<f64> {
    let start = series.len().saturating_sub(window);
    let tail = &series[start..];
    if tail.len() < min_len {
        return None;
    }
    lag_autocorrelation(tail, 2).filter(|r| r - threshold > AUTOCORRELATION_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternating_series_correlates_fully() {
        let r = lag_autocorrelation(&[0.6, 0.8, 0.6, 0.8], 2).unwrap();
        assert!((r - 1.0).abs() < 1e-9, "r = {r}");
    }

    #[test]
    fn test_monotone_series_anticorrelates() {
        let r = lag_autocorrelation(&[0.6, 0.7, 0.8, 0.9], 2).unwrap();
        assert!((r + 0.6).abs() < 1e-9, "r = {r}");
    }

    #[test]
    fn test_constant_series_has_no_autocorrelation() {
        assert!(lag_autocorrelation(&[0.7, 0.7, 0.7, 0.7], 2).is_none());
        assert!(lag_autocorrelation(&[0.7, 0.8], 2).is_none());
    }

    #[test]
    fn test_detect_oscillation_uses_trailing_window() {
        let series = [0.1, 0.2, 0.3, 0.6, 0.8, 0.6, 0.8];
        assert!(detect_oscillation(&series, 4, 3, 0.5).is_some());
        assert!(detect_oscillation(&[0.6, 0.7, 0.8, 0.9], 4, 3, 0.5).is_none());
    }

    #[test]
    fn test_three_point_alternation_sits_on_threshold() {
        // Exactly 0.5 in theory; must not fire.
        assert!(detect_oscillation(&[0.6, 0.8, 0.6], 4, 3, 0.5).is_none());
    }

    #[test]
    fn test_plateau_requires_both_epsilons() {
        assert!(is_plateau(0.70, 0.71, 0.02, 0.05));
        assert!(!is_plateau(0.70, 0.75, 0.02, 0.05));
        // Small absolute change on a tiny base is a large relative change.
        assert!(!is_plateau(0.10, 0.115, 0.02, 0.05));
        // Regressions are not plateaus.
        assert!(!is_plateau(0.80, 0.60, 0.02, 0.05));
    }

    #[test]
    fn test_improvement_from_zero() {
        assert_eq!(improvement(0.0, 0.0), (0.0, 0.0));
        let (delta, rel) = improvement(0.0, 0.2);
        assert!((delta - 0.2).abs() < 1e-12);
        assert!(rel.is_infinite());
    }
}
