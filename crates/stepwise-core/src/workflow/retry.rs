//! Retry policy evaluation and backoff computation.
//!
//! Stateless: all logic is in associated functions that take the policy as
//! a parameter.

use std::time::Duration;

use stepwise_types::workflow::{BackoffType, RetryPolicy, Step, WorkflowSettings};

pub struct RetryHandler;

impl RetryHandler {
    /// The policy governing `step`: the action's own policy, else the
    /// workflow default. Only action steps are retried.
    pub fn policy_for<'a>(step: &'a Step, settings: &'a WorkflowSettings) -> Option<&'a RetryPolicy> {
        let action = step.action()?;
        action.retry.as_ref().or(settings.retry.as_ref())
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay before the attempt following `failed_attempt`.
    ///
    /// - fixed: `initial`
    /// - linear: `initial * attempt`
    /// - exponential: `initial * multiplier^(attempt - 1)`
    ///
    /// Clamped to `max_delay_ms`.
    pub fn backoff_delay(policy: &RetryPolicy, failed_attempt: u32) -> Duration {
        let attempt = failed_attempt.max(1);
        let initial = policy.initial_delay_ms as f64;
        let raw = match policy.backoff {
            BackoffType::Fixed => initial,
            BackoffType::Linear => initial * f64::from(attempt),
            BackoffType::Exponential => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                initial * policy.multiplier.powi(exponent)
            }
        };
        let max = policy.max_delay_ms as f64;
        let clamped = if raw.is_finite() { raw.clamp(0.0, max) } else { max };
        Duration::from_millis(clamped.round() as u64)
    }
}
