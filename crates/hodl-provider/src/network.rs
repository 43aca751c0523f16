//! Network descriptors
//!
//! A [`Network`] is loaded once from configuration and never mutated; pools,
//! consensus clients and explorer clients only borrow or clone it.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ProviderError, Result};

/// Explorer requests per second when the configuration leaves it unset
pub const DEFAULT_EXPLORER_RPS: u32 = 5;

fn default_rps() -> u32 {
    DEFAULT_EXPLORER_RPS
}

/// Etherscan-compatible explorer credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// API base URL, e.g. `https://api-optimistic.etherscan.io/api`
    pub url: String,
    /// API key
    #[serde(default)]
    pub key: String,
    /// Requests per second allowed by the API plan
    #[serde(default = "default_rps")]
    pub rps: u32,
}

impl ExplorerConfig {
    /// Creates explorer credentials with the default request rate
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            rps: DEFAULT_EXPLORER_RPS,
        }
    }

    /// Sets the requests-per-second limit
    pub fn with_rps(mut self, rps: u32) -> Self {
        self.rps = rps;
        self
    }
}

/// An EVM-compatible network and the providers that serve it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Short name used in cache keys, e.g. `optimism`
    pub name: String,
    /// Expected chain id; endpoints reporting another id are discarded
    pub chain_id: u64,
    /// Symbol of the native asset
    pub native_asset: String,
    /// Public RPC URLs
    #[serde(default)]
    pub rpcs: Vec<String>,
    /// Optional block explorer
    #[serde(default)]
    pub explorer: Option<ExplorerConfig>,
    /// Deprecated networks are skipped by the ingestion stages
    #[serde(default)]
    pub deprecated: bool,
}

impl Network {
    /// Creates a network with no RPC URLs
    pub fn new(name: impl Into<String>, chain_id: u64, native_asset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_id,
            native_asset: native_asset.into(),
            rpcs: Vec::new(),
            explorer: None,
            deprecated: false,
        }
    }

    /// Adds an RPC URL
    pub fn with_rpc(mut self, url: impl Into<String>) -> Self {
        self.rpcs.push(url.into());
        self
    }

    /// Sets the block explorer
    pub fn with_explorer(mut self, explorer: ExplorerConfig) -> Self {
        self.explorer = Some(explorer);
        self
    }

    /// Validates the name and explorer URL
    ///
    /// Malformed RPC URLs are only warned about: the pool discards them at
    /// connect time like any other unusable endpoint.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(ProviderError::InvalidUrl(format!(
                "invalid network name {:?}",
                self.name
            )));
        }
        for rpc in &self.rpcs {
            if let Err(e) = Url::parse(rpc) {
                tracing::warn!(network = %self.name, rpc = %rpc, error = %e, "Malformed RPC URL");
            }
        }
        if let Some(explorer) = &self.explorer {
            Url::parse(&explorer.url)
                .map_err(|e| ProviderError::InvalidUrl(format!("{}: {e}", explorer.url)))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (chain {})", self.name, self.chain_id)
    }
}
