//! # Retry Policy
//!
//! Declarative per-stage retry policies. A policy is plain data
//! (`{base_interval_ms, multiplier, max_attempts, retryable_error_kinds}`) and
//! [`RetryPolicy::decide`] is the only place that interprets it, so policies
//! can be tested without running any stage.

use crate::error::{ErrorKind, GridloadError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub base_interval_ms: u64,
    /// Exponential multiplier applied per further attempt
    pub multiplier: f64,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Error kinds eligible for retry
    pub retryable_error_kinds: Vec<ErrorKind>,
    /// Upper bound for a single delay
    pub max_interval_ms: u64,
    /// Random extra delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fast_stage()
    }
}

/// Outcome of consulting a policy after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp { reason: GiveUpReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Error kind is not retryable under this policy
    NotRetryable,
    /// `max_attempts` reached
    Exhausted,
}

impl RetryPolicy {
    fn transient_kinds() -> Vec<ErrorKind> {
        vec![ErrorKind::TransientService, ErrorKind::StoreUnavailable]
    }

    /// Route, load and index stages: 2s base, x2, 3 attempts
    pub fn fast_stage() -> Self {
        Self {
            base_interval_ms: 2_000,
            multiplier: 2.0,
            max_attempts: 3,
            retryable_error_kinds: Self::transient_kinds(),
            max_interval_ms: 300_000,
            jitter_factor: 0.0,
        }
    }

    /// Batch compute stage: 30s base, x2, 2 attempts
    pub fn batch_compute_stage() -> Self {
        Self {
            base_interval_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 2,
            ..Self::fast_stage()
        }
    }

    /// Per-batch write retry inside the load stage: 500ms base, x2, 3 attempts
    pub fn load_batch() -> Self {
        Self {
            base_interval_ms: 500,
            multiplier: 2.0,
            max_attempts: 3,
            retryable_error_kinds: vec![ErrorKind::TransientService],
            max_interval_ms: 30_000,
            jitter_factor: 0.0,
        }
    }

    /// Single attempt, never retried
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retryable_error_kinds: Vec::new(),
            ..Self::fast_stage()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_interval(mut self, base_interval: Duration) -> Self {
        self.base_interval_ms = base_interval.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_error_kinds.contains(&kind)
    }

    /// Decide what to do after `attempt` (1-based) failed with `error`
    ///
    /// Fatal errors (classification, validation, invalid config) are never
    /// retried, whatever the policy lists.
    pub fn decide(&self, error: &GridloadError, attempt: u32) -> RetryDecision {
        if error.is_fatal() || !self.is_retryable(error.kind()) {
            return RetryDecision::GiveUp {
                reason: GiveUpReason::NotRetryable,
            };
        }
        if attempt >= self.max_attempts.max(1) {
            return RetryDecision::GiveUp {
                reason: GiveUpReason::Exhausted,
            };
        }
        RetryDecision::Retry {
            delay: self.delay_for_attempt(attempt),
        }
    }

    /// Delay after the given failed attempt: `base * multiplier^(attempt - 1)`,
    /// capped at `max_interval_ms`, plus optional jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.base_interval_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_interval_ms as f64);

        let jittered = if self.jitter_factor > 0.0 {
            capped * (1.0 + fastrand::f64() * self.jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(jittered.min(self.max_interval_ms as f64).round() as u64)
    }

    /// Check policy values are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "jitter_factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            ));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err("max_interval_ms must not be below base_interval_ms".to_string());
        }
        Ok(())
    }
}
