//! Timeouts and deadlines
//!
//! A single slow RPC endpoint must not stall a whole consensus attempt, so
//! every attempt runs against a [`Deadline`] shared by all of its probes.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};

/// Timeout error
#[derive(Debug, Clone, Error)]
#[error("Operation '{operation}' timed out after {duration:?}")]
pub struct TimeoutError {
    /// The operation that timed out
    pub operation: String,
    /// The timeout duration
    pub duration: Duration,
}

/// Execute a future with a timeout
pub async fn with_timeout<T>(
    duration: Duration,
    operation: impl Into<String>,
    future: impl Future<Output = T>,
) -> Result<T, TimeoutError> {
    let op = operation.into();
    timeout(duration, future).await.map_err(|_| TimeoutError {
        operation: op,
        duration,
    })
}

/// Deadline tracking for operations made of several awaits
#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Create a new deadline starting now
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// Check if deadline has passed
    pub fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    /// Get remaining time
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Execute with remaining time as timeout
    pub async fn execute<T, E>(
        &self,
        future: impl Future<Output = Result<T, E>>,
    ) -> Result<T, DeadlineError<E>> {
        if self.is_expired() {
            return Err(DeadlineError::Expired);
        }

        match timeout(self.remaining(), future).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(DeadlineError::Inner(e)),
            Err(_) => Err(DeadlineError::Expired),
        }
    }
}

/// Deadline error
#[derive(Debug)]
pub enum DeadlineError<E> {
    /// Deadline expired
    Expired,
    /// Inner operation error
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for DeadlineError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "Deadline expired"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DeadlineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Expired => None,
            Self::Inner(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.operation, "slow");
        assert!(err.to_string().contains("slow"));
    }

    #[tokio::test]
    async fn test_with_timeout_completes() {
        let result = with_timeout(Duration::from_secs(1), "fast", async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_shared_across_awaits() {
        let deadline = Deadline::new(Duration::from_millis(100));

        let first: Result<u8, DeadlineError<&str>> = deadline
            .execute(async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(1)
            })
            .await;
        assert_eq!(first.unwrap(), 1);

        // Only ~40ms remain, so a 60ms operation no longer fits
        let second: Result<u8, DeadlineError<&str>> = deadline
            .execute(async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok(2)
            })
            .await;
        assert!(matches!(second, Err(DeadlineError::Expired)));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_deadline_passes_inner_error() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let result: Result<(), _> = deadline.execute(async { Err("boom") }).await;
        assert!(matches!(result, Err(DeadlineError::Inner("boom"))));
    }
}
