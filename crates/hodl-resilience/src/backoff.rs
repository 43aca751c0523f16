//! Backoff schedules
//!
//! Multiplicative delays for generic retries (a multiplier of 1.0 gives the
//! constant consensus retry schedule) and a linear schedule for explorer
//! throttling.

use std::time::Duration;

/// Backoff strategy configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Multiplier for each retry (1.0 gives a constant delay)
    pub multiplier: f64,
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Constant delay between a fixed number of attempts
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            max_attempts,
        }
    }
}

/// Exponential backoff iterator
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
    current_delay: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff instance
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Get the current attempt number (0-indexed)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Check if more retries are allowed
    pub fn can_retry(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Get remaining attempts
    pub fn remaining_attempts(&self) -> u32 {
        self.config.max_attempts.saturating_sub(self.attempt)
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.can_retry() {
            return None;
        }

        let capped_delay = self.current_delay.min(self.config.max_delay);

        self.attempt += 1;
        self.current_delay = Duration::from_secs_f64(
            (self.current_delay.as_secs_f64() * self.config.multiplier)
                .min(self.config.max_delay.as_secs_f64()),
        );

        Some(capped_delay)
    }
}

/// Execute a function with backoff retries, retrying every error
pub async fn with_backoff<F, Fut, T, E>(
    config: BackoffConfig,
    mut f: F,
) -> Result<T, BackoffError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut backoff = ExponentialBackoff::new(config);
    let mut last_error = None;

    while backoff.can_retry() {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                tracing::debug!(
                    attempt = backoff.attempt(),
                    remaining = backoff.remaining_attempts(),
                    error = ?e,
                    "Operation failed, will retry"
                );
                last_error = Some(e);

                if let Some(delay) = backoff.next() {
                    if backoff.can_retry() {
                        tracing::trace!(delay = ?delay, "Waiting before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    Err(BackoffError {
        attempts: backoff.attempt,
        last_error,
    })
}

/// Linearly escalating delays: `step`, `2 * step`, `3 * step`, ...
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    /// Delay added per escalation
    pub step: Duration,
    /// Escalations allowed before giving up
    pub max_escalations: u32,
    escalation: u32,
}

impl LinearBackoff {
    /// Create a linear schedule
    pub fn new(step: Duration, max_escalations: u32) -> Self {
        Self {
            step,
            max_escalations,
            escalation: 0,
        }
    }

    /// Number of escalations taken so far
    pub fn escalations(&self) -> u32 {
        self.escalation
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 10)
    }
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.escalation >= self.max_escalations {
            return None;
        }
        self.escalation += 1;
        Some(self.step * self.escalation)
    }
}

/// Retry `f` on a linear schedule while `is_retryable` accepts the error.
///
/// Non-retryable errors are returned immediately in `BackoffError::last_error`.
pub async fn with_linear_backoff<F, Fut, T, E, P>(
    mut schedule: LinearBackoff,
    is_retryable: P,
    mut f: F,
) -> Result<T, BackoffError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let e = match f().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(BackoffError {
                attempts,
                last_error: Some(e),
            });
        }

        match schedule.next() {
            Some(delay) => {
                tracing::debug!(
                    escalation = schedule.escalations(),
                    delay = ?delay,
                    error = ?e,
                    "Throttled, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                return Err(BackoffError {
                    attempts,
                    last_error: Some(e),
                })
            }
        }
    }
}

/// Error when all retries exhausted
#[derive(Debug)]
pub struct BackoffError<E> {
    /// Number of attempts made
    pub attempts: u32,
    /// Last error encountered
    pub last_error: Option<E>,
}

impl<E: std::fmt::Display> std::fmt::Display for BackoffError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "All {} retry attempts exhausted", self.attempts)?;
        if let Some(ref e) = self.last_error {
            write!(f, "; last error: {}", e)?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BackoffError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error.as_ref().map(|e| e as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn doubling(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_iteration() {
        let config = doubling(3);

        let delays: Vec<_> = ExponentialBackoff::new(config).collect();

        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
    }

    #[test]
    fn test_fixed_schedule_is_constant() {
        let delays: Vec<_> =
            ExponentialBackoff::new(BackoffConfig::fixed(Duration::from_millis(500), 5)).collect();
        assert_eq!(delays, vec![Duration::from_millis(500); 5]);
    }

    #[test]
    fn test_max_delay_cap() {
        let config = BackoffConfig {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            ..doubling(5)
        };

        for delay in ExponentialBackoff::new(config) {
            assert!(delay <= Duration::from_secs(15));
        }
    }

    #[test]
    fn test_remaining_attempts() {
        let mut backoff = ExponentialBackoff::new(doubling(5));

        assert_eq!(backoff.remaining_attempts(), 5);
        backoff.next();
        assert_eq!(backoff.remaining_attempts(), 4);
        backoff.next();
        backoff.next();
        assert_eq!(backoff.remaining_attempts(), 2);
    }

    #[test]
    fn test_linear_schedule() {
        let delays: Vec<_> = LinearBackoff::new(Duration::from_secs(1), 4).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_eventual_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_backoff(BackoffConfig::fixed(Duration::from_millis(500), 5), || {
            let a = counter.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 5 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_exhausted() {
        let result: Result<(), _> = with_backoff(
            BackoffConfig::fixed(Duration::from_millis(1), 3),
            || async { Err::<(), _>("always fails") },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, Some("always fails"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_gives_up_after_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = with_linear_backoff(
            LinearBackoff::new(Duration::from_secs(1), 10),
            |_: &&str| true,
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("rate limited") }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 11);
        assert_eq!(attempts.load(Ordering::SeqCst), 11);
        // 1 + 2 + ... + 10 seconds of sleeping
        assert!(started.elapsed() >= Duration::from_secs(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_propagates_fatal_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = with_linear_backoff(
            LinearBackoff::default(),
            |e: &&str| e.contains("rate"),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("invalid api key") }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_error, Some("invalid api key"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
