//! Retry classification
//!
//! Decides which failures are transient (throttling, overloaded servers) and
//! worth backing off for, as opposed to errors that must propagate.

/// Message-based classifier for common transient failures
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryClassifier;

impl DefaultRetryClassifier {
    /// Classify a raw error message
    pub fn is_message_retryable(message: &str) -> bool {
        let msg = message.to_lowercase();

        // Network/connection errors
        if msg.contains("connection")
            || msg.contains("timeout")
            || msg.contains("timed out")
        {
            return true;
        }

        // Server errors
        if msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("504")
            || msg.contains("internal server")
            || msg.contains("service unavailable")
            || msg.contains("gateway")
        {
            return true;
        }

        // Rate limiting
        msg.contains("429")
            || msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("throttl")
    }
}

/// HTTP-specific retry classifier
#[derive(Debug, Clone, Default)]
pub struct HttpRetryClassifier;

impl HttpRetryClassifier {
    /// Check if HTTP status code is retryable
    pub fn is_status_retryable(status: u16) -> bool {
        matches!(
            status,
            408 | // Request Timeout
            425 | // Too Early
            429 | // Too Many Requests
            500 | // Internal Server Error
            502 | // Bad Gateway
            503 | // Service Unavailable
            504   // Gateway Timeout
        )
    }
}
