//! Reconnection backoff policy.

use std::time::Duration;

use crate::error::{Error, Result};

/// Backoff policy for re-establishing the ADS session.
///
/// Delays grow exponentially from `initial_backoff` up to `max_backoff`.
/// Retries are unbounded unless `max_attempts` is set.
///
/// # Example
///
/// ```
/// use ads_client::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_initial_backoff(Duration::from_millis(200)).unwrap()
///     .with_max_backoff(Duration::from_secs(10)).unwrap();
/// assert_eq!(policy.backoff_duration(0), Some(Duration::from_millis(200)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry after a failed connect.
    ///
    /// Default: 1 second.
    pub initial_backoff: Duration,

    /// Upper bound on any single delay.
    ///
    /// Default: 30 seconds.
    pub max_backoff: Duration,

    /// Factor applied to the delay after each consecutive failure.
    ///
    /// Default: 2.0.
    pub backoff_multiplier: f64,

    /// Consecutive failed connects tolerated before the client gives up.
    ///
    /// Default: None (retry forever).
    pub max_attempts: Option<usize>,
}

impl RetryPolicy {
    /// Create a policy with custom parameters and unbounded attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `initial_backoff` is zero,
    /// `backoff_multiplier` is below 1.0, or `max_backoff` is below
    /// `initial_backoff`.
    ///
    /// ```
    /// use ads_client::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(60), 1.5)?;
    /// # Ok::<(), ads_client::Error>(())
    /// ```
    pub fn new(
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        RetryPolicy::default()
            .with_backoff_multiplier(backoff_multiplier)?
            .with_max_backoff(Duration::MAX)?
            .with_initial_backoff(initial_backoff)?
            .with_max_backoff(max_backoff)
    }

    /// Set the initial backoff duration.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is zero or greater than `max_backoff`.
    pub fn with_initial_backoff(mut self, duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::Validation(
                "initial_backoff must be greater than zero".into(),
            ));
        }
        if duration > self.max_backoff {
            let max_backoff = self.max_backoff;
            return Err(Error::Validation(format!(
                "initial_backoff ({duration:?}) must be <= max_backoff ({max_backoff:?})"
            )));
        }
        self.initial_backoff = duration;
        Ok(self)
    }

    /// Set the maximum backoff duration.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is less than `initial_backoff`.
    pub fn with_max_backoff(mut self, duration: Duration) -> Result<Self> {
        if duration < self.initial_backoff {
            let initial_backoff = self.initial_backoff;
            return Err(Error::Validation(format!(
                "max_backoff ({duration:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        self.max_backoff = duration;
        Ok(self)
    }

    /// Set the backoff multiplier.
    ///
    /// # Errors
    ///
    /// Returns an error if `multiplier` is less than 1.0 or not finite.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Result<Self> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "backoff_multiplier must be >= 1.0, got {multiplier}"
            )));
        }
        self.backoff_multiplier = multiplier;
        Ok(self)
    }

    /// Bound the number of consecutive failed connects. `None` retries forever.
    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` once
    /// `max_attempts` is exhausted.
    ///
    /// ```
    /// use ads_client::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff_duration(0), Some(Duration::from_secs(1)));
    /// assert_eq!(policy.backoff_duration(2), Some(Duration::from_secs(4)));
    /// assert_eq!(policy.backoff_duration(10), Some(Duration::from_secs(30)));
    /// ```
    pub fn backoff_duration(&self, attempt: usize) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(max);
        Some(Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    /// 1s initial delay, doubling up to 30s, unbounded attempts.
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Stateful backoff calculator based on a [`RetryPolicy`].
///
/// ```
/// use ads_client::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(RetryPolicy::default());
/// assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
/// assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
///
/// // A session came up: start over.
/// backoff.reset();
/// assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: usize,
}

impl Backoff {
    /// Create a new backoff calculator from a retry policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Get the next delay and advance the attempt counter.
    ///
    /// Returns `None` if `max_attempts` has been exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let duration = self.policy.backoff_duration(self.attempt)?;
        self.attempt += 1;
        Some(duration)
    }

    /// Reset after a session is established.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
