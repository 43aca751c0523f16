use thiserror::Error;

/// Errors raised while ingesting EVM history
#[derive(Error, Debug)]
pub enum Error {
    /// RPC or explorer failure, including quorum failures
    #[error(transparent)]
    Provider(#[from] hodl_provider::ProviderError),

    /// Durable cache failure
    #[error(transparent)]
    Store(#[from] hodl_store::StoreError),

    /// JSON encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A contract call returned data that does not decode
    #[error("ABI decode error: {0}")]
    Abi(String),

    /// A hash or address string is malformed
    #[error("Invalid {kind}: {value}")]
    Invalid {
        /// What was being parsed
        kind: &'static str,
        /// The offending input
        value: String,
    },

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// A quorum answered successfully but with nothing in it
    #[error("No {what} returned for {key}")]
    Empty {
        /// Which document was requested
        what: &'static str,
        /// Cache key of the request
        key: String,
    },

    /// The network has no block explorer, so history is unavailable
    #[error("No explorer configured for {0}")]
    NoExplorer(String),
}

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, Error>;
