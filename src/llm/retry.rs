use std::time::Duration;

use super::LlmError;

/// Bounded retry with exponential backoff (`base_delay * 2^attempt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Treated as at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// No waiting between attempts (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay before the attempt following `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(10))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out. `op` receives the zero-based attempt number.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> Result<T, LlmError>) -> Result<T, LlmError> {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt + 1 < attempts {
                        let delay = self.delay_for(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "LLM call failed, retrying"
                        );
                        std::thread::sleep(delay);
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| LlmError::HttpClient("no attempt made".into())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run(|_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(LlmError::Timeout(60))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn consecutive_failures_exhaust_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3).run(|_| {
            calls.set(calls.get() + 1);
            Err(LlmError::RateLimited("busy".into()))
        });
        assert_eq!(calls.get(), 3);
        match result.unwrap_err() {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, LlmError::RateLimited(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn authentication_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5).run(|_| {
            calls.set(calls.get() + 1);
            Err(LlmError::Authentication { status: 401 })
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(result.unwrap_err(), LlmError::Authentication { .. }));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let _ = RetryPolicy::immediate(0).run(|_| {
            calls.set(calls.get() + 1);
            Err::<(), _>(LlmError::Timeout(1))
        });
        assert_eq!(calls.get(), 1);
    }
}
