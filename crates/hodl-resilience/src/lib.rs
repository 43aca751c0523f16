//! # hodl resilience
//!
//! Retry and timeout primitives shared by the RPC consensus client and the
//! block-explorer client.
//!
//! - **Backoff**: exponential, constant and linear retry schedules
//! - **Retry classification**: which HTTP statuses and provider messages are transient
//! - **Timeouts**: single-future timeouts and shared deadlines
//!
//! ## Example
//!
//! ```rust
//! use hodl_resilience::{BackoffConfig, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let delays: Vec<_> =
//!     ExponentialBackoff::new(BackoffConfig::fixed(Duration::from_millis(500), 5)).collect();
//! assert_eq!(delays.len(), 5);
//! assert!(delays.iter().all(|d| *d == Duration::from_millis(500)));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod retry_policy;
pub mod timeout;

pub use backoff::{
    with_backoff, with_linear_backoff, BackoffConfig, BackoffError, ExponentialBackoff,
    LinearBackoff,
};

pub use retry_policy::{DefaultRetryClassifier, HttpRetryClassifier};

pub use timeout::{with_timeout, Deadline, DeadlineError, TimeoutError};
