//! # hodl provider
//!
//! Trust-minimized access to EVM networks reachable only through public,
//! possibly inconsistent RPC providers.
//!
//! - [`EndpointPool`] dials every configured RPC URL and keeps only the
//!   endpoints reporting the expected chain id.
//! - [`ConsensusClient`] fans a read-only query out to the pool and accepts an
//!   answer once [`QUORUM`] endpoints agree on its comparison key.
//! - [`ExplorerClient`] enumerates an address's transaction history from an
//!   etherscan-compatible API behind one rate limiter.
//!
//! ## Example
//!
//! ```ignore
//! use hodl_provider::{ConsensusClient, Network, parse_quantity};
//! use serde_json::json;
//!
//! let network = Network::new("optimism", 10, "ETH")
//!     .with_rpc("https://mainnet.optimism.io")
//!     .with_rpc("https://optimism.publicnode.com");
//! let client = ConsensusClient::http(network)?;
//!
//! let latest = client
//!     .consensus_call(|endpoint| async move {
//!         let hex: String = endpoint.call("eth_blockNumber", json!([])).await?;
//!         let number = parse_quantity(&hex)?;
//!         Ok::<_, hodl_provider::ProviderError>((number, number))
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consensus;
pub mod explorer;
pub mod network;
pub mod pool;
pub mod transport;

pub use consensus::{ConsensusClient, ConsensusSettings, CONSENSUS_RETRIES, QUORUM};
pub use explorer::{ExplorerClient, HistoryKind, InternalTransfer};
pub use network::{ExplorerConfig, Network};
pub use pool::{Endpoint, EndpointPool};
pub use transport::{
    Connector, HttpClientConfig, HttpConnector, HttpTransport, JsonRpcRequest, RateLimitConfig,
    RpcClient, Transport,
};

use thiserror::Error;

/// Provider-related errors
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider throttled the request
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RPC error response
    #[error("RPC error: code={code}, message={message}")]
    RpcError {
        /// Error code
        code: i64,
        /// Error message
        message: String,
    },

    /// A hex quantity could not be parsed
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Fewer endpoints than the quorum survived dialing and chain id checks
    #[error("Connected to less than quorum of {quorum} clients for chain ID {chain_id} (only found {found})")]
    InsufficientEndpoints {
        /// Required quorum
        quorum: usize,
        /// Expected chain id
        chain_id: u64,
        /// Endpoints actually usable
        found: usize,
    },

    /// Every endpoint was tried and no comparison key reached quorum
    #[error("No quorum was successful and agreed")]
    NoQuorum,

    /// Block explorer rejected the request
    #[error("Explorer error: {0}")]
    Explorer(String),

    /// The network has no block explorer configured
    #[error("No explorer configured for {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the error signals provider throttling or a transient server failure
    pub fn is_throttling(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) => true,
            ProviderError::HttpStatus(status) => {
                hodl_resilience::HttpRetryClassifier::is_status_retryable(*status)
            }
            _ => false,
        }
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Parses a `0x`-prefixed hex quantity as returned by JSON-RPC
pub fn parse_quantity(value: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| ProviderError::InvalidQuantity(value.to_string()))?;
    if digits.is_empty() {
        return Err(ProviderError::InvalidQuantity(value.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| ProviderError::InvalidQuantity(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0xa").unwrap(), 10);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1234ab").unwrap(), 0x1234ab);
        assert!(parse_quantity("10").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_insufficient_endpoints_message() {
        let err = ProviderError::InsufficientEndpoints {
            quorum: 2,
            chain_id: 10,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "Connected to less than quorum of 2 clients for chain ID 10 (only found 1)"
        );
    }

    #[test]
    fn test_throttling_classification() {
        assert!(ProviderError::RateLimited("Max rate limit reached".into()).is_throttling());
        assert!(ProviderError::HttpStatus(429).is_throttling());
        assert!(ProviderError::HttpStatus(502).is_throttling());
        assert!(!ProviderError::HttpStatus(403).is_throttling());
        assert!(!ProviderError::Explorer("Invalid API Key".into()).is_throttling());
    }
}
