//! Retry with a deadline, bounded attempts, and fuzzed backoff.
//!
//! Wraps flaky operations (remote commands against machines that are
//! still booting, eventually-consistent APIs) so one call site can
//! express "keep trying until this works or we run out of time".

use crate::error::{Error, Result};
use rand::Rng;
use std::fmt::Display;
use std::thread;
use std::time::{Duration, Instant};

/// Default pause between attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for all attempts together.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1200);

/// Default jitter fraction.
pub const DEFAULT_FUZZ: f64 = 0.5;

/// How an operation is retried on failure.
///
/// Each attempt that fails sleeps `poll_interval * (1 - fuzz + fuzz * r)`
/// with `r` uniform in `[0, 1)`, so concurrent retriers spread out
/// instead of hammering a resource in lockstep. The operation gives up
/// when the next sleep would cross the deadline or the retry count is
/// exhausted, re-returning the last failure unchanged. At least one
/// attempt is always made.
///
/// `max_retries: None` together with `timeout: None` retries forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Pause between attempts. This is the maximum pause when fuzz is set.
    pub poll_interval: Duration,
    /// Retries allowed after the first attempt. `None` is unbounded.
    pub max_retries: Option<u32>,
    /// Deadline for all attempts, computed once per invocation. `None`
    /// is unbounded.
    pub timeout: Option<Duration>,
    /// Jitter fraction in `[0, 1]`. At 0 every pause is exactly
    /// `poll_interval`; at 1 a pause lands anywhere in
    /// `[0, poll_interval)`.
    pub fuzz: f64,
    /// Log each retried failure at error level.
    pub log_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: None,
            timeout: Some(DEFAULT_TIMEOUT),
            fuzz: DEFAULT_FUZZ,
            log_errors: true,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll_interval must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.fuzz) {
            return Err(Error::config("fuzz must be in [0, 1]"));
        }
        Ok(())
    }

    /// Run `op`, retrying every failure under this policy.
    pub fn run<T, E, F>(&self, op: F) -> std::result::Result<T, E>
    where
        E: Display,
        F: FnMut() -> std::result::Result<T, E>,
    {
        self.run_if(op, |_| true)
    }

    /// Run `op`, retrying only failures for which `retryable` returns
    /// true. Non-retryable failures propagate on first occurrence.
    pub fn run_if<T, E, F, P>(&self, mut op: F, retryable: P) -> std::result::Result<T, E>
    where
        E: Display,
        F: FnMut() -> std::result::Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let mut tries: u32 = 0;

        loop {
            tries += 1;
            let error = match op() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !retryable(&error) {
                return Err(error);
            }

            let sleep = self.sleep_interval();
            let deadline_hit = deadline.is_some_and(|d| Instant::now() + sleep >= d);
            let retries_spent = self.max_retries.is_some_and(|max| tries > max);
            if deadline_hit || retries_spent {
                return Err(error);
            }

            if self.log_errors {
                tracing::error!(error = %error, tries, "retryable operation failed");
            }
            thread::sleep(sleep);
        }
    }

    fn sleep_interval(&self) -> Duration {
        let fuzz_multiplier = 1.0 - self.fuzz + self.fuzz * rand::thread_rng().gen::<f64>();
        self.poll_interval.mul_f64(fuzz_multiplier)
    }
}

#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.policy.poll_interval = interval;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = Some(retries);
        self
    }

    pub fn unbounded_retries(mut self) -> Self {
        self.policy.max_retries = None;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.policy.timeout = None;
        self
    }

    pub fn fuzz(mut self, fuzz: f64) -> Self {
        self.policy.fuzz = fuzz;
        self
    }

    pub fn log_errors(mut self, log: bool) -> Self {
        self.policy.log_errors = log;
        self
    }

    pub fn build(self) -> Result<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick_policy() -> RetryPolicyBuilder {
        RetryPolicy::builder()
            .poll_interval(Duration::from_millis(5))
            .fuzz(0.0)
            .log_errors(false)
    }

    #[test]
    fn test_success_needs_one_attempt() {
        let attempts = Cell::new(0u32);
        let result: std::result::Result<i32, String> = quick_policy()
            .build()
            .unwrap()
            .run(|| {
                attempts.set(attempts.get() + 1);
                Ok(7)
            });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_retries_until_success() {
        let attempts = Cell::new(0u32);
        let result: std::result::Result<i32, String> = quick_policy()
            .no_timeout()
            .build()
            .unwrap()
            .run(|| {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 4 {
                    Err("not yet".to_string())
                } else {
                    Ok(42)
                }
            });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 4);
    }

    #[test]
    fn test_max_retries_bounds_attempts() {
        let attempts = Cell::new(0u32);
        let result: std::result::Result<(), String> = quick_policy()
            .no_timeout()
            .max_retries(2)
            .build()
            .unwrap()
            .run(|| {
                attempts.set(attempts.get() + 1);
                Err("boom".to_string())
            });

        // One initial attempt plus two retries.
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_deadline_arithmetic() {
        let attempts = Cell::new(0u32);
        let policy = RetryPolicy::builder()
            .poll_interval(Duration::from_millis(50))
            .fuzz(0.0)
            .timeout(Duration::from_millis(250))
            .log_errors(false)
            .build()
            .unwrap();

        let started = Instant::now();
        let result: std::result::Result<(), String> = policy.run(|| {
            attempts.set(attempts.get() + 1);
            Err("still down".to_string())
        });

        // The original failure comes back, not a timeout error, after
        // roughly timeout / poll_interval attempts.
        assert_eq!(result.unwrap_err(), "still down");
        assert!((4..=6).contains(&attempts.get()), "got {}", attempts.get());
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_zero_timeout_still_attempts_once() {
        let attempts = Cell::new(0u32);
        let result: std::result::Result<(), String> = quick_policy()
            .timeout(Duration::ZERO)
            .build()
            .unwrap()
            .run(|| {
                attempts.set(attempts.get() + 1);
                Err("down".to_string())
            });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_non_retryable_propagates_immediately() {
        let attempts = Cell::new(0u32);
        let result: std::result::Result<(), String> = quick_policy()
            .no_timeout()
            .build()
            .unwrap()
            .run_if(
                || {
                    attempts.set(attempts.get() + 1);
                    Err("fatal: bad credentials".to_string())
                },
                |error| !error.starts_with("fatal"),
            );

        assert_eq!(result.unwrap_err(), "fatal: bad credentials");
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_fuzz_out_of_range_rejected() {
        assert!(RetryPolicy::builder().fuzz(1.5).build().is_err());
    }
}
