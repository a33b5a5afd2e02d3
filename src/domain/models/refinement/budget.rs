//! Session resource envelope.
//!
//! A refinement session is bounded along four dimensions at once: completed
//! rounds, wall time, model calls and tokens. The first dimension to run out
//! ends the session with [`HardLimit`] naming it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The limit that ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "limit", rename_all = "snake_case")]
pub enum HardLimit {
    Iterations { used: u32, max: u32 },
    ElapsedTime { elapsed_ms: u64, max_ms: u64 },
    ModelCalls { used: u32, max: u32 },
    Tokens { used: u64, max: u64 },
}

impl fmt::Display for HardLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iterations { used, max } => write!(f, "iterations {used}/{max}"),
            Self::ElapsedTime { elapsed_ms, max_ms } => {
                write!(f, "elapsed time {elapsed_ms}ms/{max_ms}ms")
            }
            Self::ModelCalls { used, max } => write!(f, "model calls {used}/{max}"),
            Self::Tokens { used, max } => write!(f, "tokens {used}/{max}"),
        }
    }
}

/// Multi-dimensional budget owned by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementBudget {
    /// Maximum completed evaluation rounds.
    pub max_iterations: u32,
    /// Maximum wall time for the whole session.
    pub max_elapsed: Duration,
    /// Maximum judge, fix and regeneration calls.
    pub max_model_calls: u32,
    /// Maximum tokens across all calls.
    pub max_tokens: u64,

    pub iterations_used: u32,
    pub elapsed: Duration,
    pub model_calls_used: u32,
    pub tokens_used: u64,
}

impl Default for RefinementBudget {
    /// 10 rounds, 300 seconds, 50 model calls, 500 000 tokens.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(300), 50, 500_000)
    }
}

impl RefinementBudget {
    pub const fn new(
        max_iterations: u32,
        max_elapsed: Duration,
        max_model_calls: u32,
        max_tokens: u64,
    ) -> Self {
        Self {
            max_iterations,
            max_elapsed,
            max_model_calls,
            max_tokens,
            iterations_used: 0,
            elapsed: Duration::ZERO,
            model_calls_used: 0,
            tokens_used: 0,
        }
    }

    /// Record one completed evaluation round.
    pub fn consume_iteration(&mut self) {
        self.iterations_used += 1;
    }

    /// Record model calls and the tokens they spent.
    pub fn consume_calls(&mut self, calls: u32, tokens: u64) {
        self.model_calls_used = self.model_calls_used.saturating_add(calls);
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    /// Update the session's elapsed wall time.
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// Model calls still available.
    pub const fn remaining_model_calls(&self) -> u32 {
        self.max_model_calls.saturating_sub(self.model_calls_used)
    }

    /// Fraction remaining along the tightest dimension, in `[0, 1]`.
    pub fn remaining_fraction(&self) -> f64 {
        let iter_frac = 1.0 - f64::from(self.iterations_used) / f64::from(self.max_iterations.max(1));
        let time_frac = 1.0
            - self.elapsed.as_secs_f64() / self.max_elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
        let call_frac =
            1.0 - f64::from(self.model_calls_used) / f64::from(self.max_model_calls.max(1));
        let token_frac = 1.0 - self.tokens_used as f64 / self.max_tokens.max(1) as f64;

        iter_frac
            .min(time_frac)
            .min(call_frac)
            .min(token_frac)
            .clamp(0.0, 1.0)
    }

    /// The first exhausted dimension, checked in the order iterations, wall
    /// time, model calls, tokens.
    pub fn exhausted_limit(&self) -> Option<HardLimit> {
        if self.iterations_used >= self.max_iterations {
            return Some(HardLimit::Iterations {
                used: self.iterations_used,
                max: self.max_iterations,
            });
        }
        if self.elapsed >= self.max_elapsed {
            return Some(HardLimit::ElapsedTime {
                elapsed_ms: duration_ms(self.elapsed),
                max_ms: duration_ms(self.max_elapsed),
            });
        }
        if self.model_calls_used >= self.max_model_calls {
            return Some(HardLimit::ModelCalls {
                used: self.model_calls_used,
                max: self.max_model_calls,
            });
        }
        if self.tokens_used >= self.max_tokens {
            return Some(HardLimit::Tokens {
                used: self.tokens_used,
                max: self.max_tokens,
            });
        }
        None
    }

    /// Whether any dimension has gone past its maximum rather than just
    /// reaching it. Token and wall-time use can overshoot inside a round.
    pub fn is_overrun(&self) -> bool {
        self.iterations_used > self.max_iterations
            || self.elapsed > self.max_elapsed
            || self.model_calls_used > self.max_model_calls
            || self.tokens_used > self.max_tokens
    }

    pub fn has_remaining(&self) -> bool {
        self.exhausted_limit().is_none()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_budget_has_remaining() {
        let budget = RefinementBudget::default();
        assert!(budget.has_remaining());
        assert!((budget.remaining_fraction() - 1.0).abs() < 1e-9);
        assert_eq!(budget.remaining_model_calls(), 50);
    }

    #[test]
    fn test_iterations_checked_first() {
        let mut budget = RefinementBudget::new(2, Duration::from_secs(1), 3, 100);
        budget.consume_iteration();
        budget.consume_iteration();
        budget.consume_calls(5, 500);
        budget.set_elapsed(Duration::from_secs(2));
        assert_eq!(
            budget.exhausted_limit(),
            Some(HardLimit::Iterations { used: 2, max: 2 })
        );
    }

    #[test]
    fn test_each_dimension_exhausts() {
        let mut time = RefinementBudget::new(10, Duration::from_millis(100), 50, 1000);
        time.set_elapsed(Duration::from_millis(100));
        assert!(matches!(time.exhausted_limit(), Some(HardLimit::ElapsedTime { .. })));

        let mut calls = RefinementBudget::new(10, Duration::from_secs(10), 3, 1000);
        calls.consume_calls(3, 0);
        assert_eq!(calls.exhausted_limit(), Some(HardLimit::ModelCalls { used: 3, max: 3 }));

        let mut tokens = RefinementBudget::new(10, Duration::from_secs(10), 50, 1000);
        tokens.consume_calls(1, 1000);
        assert_eq!(tokens.exhausted_limit(), Some(HardLimit::Tokens { used: 1000, max: 1000 }));
    }

    #[test]
    fn test_reached_is_not_overrun() {
        let mut budget = RefinementBudget::new(1, Duration::from_secs(10), 2, 100);
        budget.consume_iteration();
        budget.consume_calls(2, 100);
        assert!(budget.exhausted_limit().is_some());
        assert!(!budget.is_overrun());

        budget.consume_calls(0, 1);
        assert!(budget.is_overrun());
    }

    #[test]
    fn test_remaining_fraction_tracks_tightest() {
        let mut budget = RefinementBudget::new(10, Duration::from_secs(100), 50, 1000);
        budget.consume_iteration();
        budget.consume_calls(25, 100);
        assert!((budget.remaining_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_hard_limit_display() {
        assert_eq!(
            HardLimit::Iterations { used: 10, max: 10 }.to_string(),
            "iterations 10/10"
        );
    }
}
