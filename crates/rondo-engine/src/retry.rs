use rondo_core::ErrorClass;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures retry behaviour for rate-limited and transient errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of request attempts (1 = no retries).
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds; also caps vendor retry-after hints.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay_ms: 2_000,
            max_delay_ms: 65_000,
        }
    }
}

/// The controller's verdict after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for this long, then resubmit.
    RetryAfter(Duration),
    /// Give up; propagate the error.
    Abort,
}

/// Decides whether and how long to wait before resubmitting a failed
/// request.
///
/// Pure decision logic, decoupled from the transport: the caller owns
/// the sleep and the attempt counter (which resets each round).
#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Creates a controller for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The configured attempt ceiling.
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Decides the outcome of attempt number `attempt` (0-based)
    /// failing with the given classification.
    ///
    /// Fatal errors never retry. For retryable classes the delay is
    /// `min(base * 2^attempt, cap)`, raised to a vendor retry-after
    /// `hint` when the hint is larger (the hint is capped too).
    pub fn decide(
        &self,
        class: ErrorClass,
        attempt: u32,
        hint: Option<Duration>,
    ) -> RetryDecision {
        if class == ErrorClass::Fatal {
            return RetryDecision::Abort;
        }
        if attempt + 1 >= self.policy.max_attempts {
            return RetryDecision::Abort;
        }

        let cap = Duration::from_millis(self.policy.max_delay_ms);
        let exp = self
            .policy
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let mut delay = Duration::from_millis(exp).min(cap);

        if let Some(hint) = hint {
            delay = delay.max(hint.min(cap));
        }

        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn controller(max_attempts: u32, base_ms: u64, cap_ms: u64) -> RetryController {
        RetryController::new(RetryPolicy {
            max_attempts,
            base_delay_ms: base_ms,
            max_delay_ms: cap_ms,
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let c = controller(10, 500, 8_000);
        let delays: Vec<_> = (0..6)
            .map(|a| c.decide(ErrorClass::Transient, a, None))
            .collect();
        assert_eq!(
            delays,
            vec![
                RetryDecision::RetryAfter(Duration::from_millis(500)),
                RetryDecision::RetryAfter(Duration::from_millis(1_000)),
                RetryDecision::RetryAfter(Duration::from_millis(2_000)),
                RetryDecision::RetryAfter(Duration::from_millis(4_000)),
                RetryDecision::RetryAfter(Duration::from_millis(8_000)),
                RetryDecision::RetryAfter(Duration::from_millis(8_000)), // capped
            ]
        );
    }

    #[test]
    fn fatal_never_retries() {
        let c = controller(10, 500, 8_000);
        assert_eq!(c.decide(ErrorClass::Fatal, 0, None), RetryDecision::Abort);
    }

    #[test]
    fn attempt_ceiling_aborts() {
        let c = controller(3, 1_000, 8_000);
        assert!(matches!(
            c.decide(ErrorClass::RateLimited, 0, None),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            c.decide(ErrorClass::RateLimited, 1, None),
            RetryDecision::RetryAfter(_)
        ));
        // Third attempt just failed: no fourth attempt allowed.
        assert_eq!(
            c.decide(ErrorClass::RateLimited, 2, None),
            RetryDecision::Abort
        );
    }

    #[test]
    fn hint_wins_when_larger() {
        let c = controller(10, 1_000, 60_000);
        assert_eq!(
            c.decide(
                ErrorClass::RateLimited,
                0,
                Some(Duration::from_secs(30)),
            ),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
    }

    #[test]
    fn backoff_wins_when_hint_smaller() {
        let c = controller(10, 4_000, 60_000);
        assert_eq!(
            c.decide(ErrorClass::RateLimited, 2, Some(Duration::from_secs(1))),
            RetryDecision::RetryAfter(Duration::from_secs(16))
        );
    }

    #[test]
    fn hint_is_capped() {
        let c = controller(10, 1_000, 8_000);
        assert_eq!(
            c.decide(
                ErrorClass::RateLimited,
                0,
                Some(Duration::from_secs(600)),
            ),
            RetryDecision::RetryAfter(Duration::from_secs(8))
        );
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let c = controller(1, 1_000, 8_000);
        assert_eq!(
            c.decide(ErrorClass::Transient, 0, None),
            RetryDecision::Abort
        );
    }
}
