//! Endpoint pool
//!
//! Owns the live connections for one network. Endpoints are dialed lazily,
//! checked against the network's chain id, and kept for the pool's lifetime.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use hodl_resilience::with_timeout;

use crate::transport::{Connector, Transport};
use crate::{parse_quantity, Network, ProviderError, Result};

/// How long dialing plus the chain id check may take per URL
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One RPC URL and its live connection
pub struct Endpoint {
    url: String,
    transport: Arc<dyn Transport>,
}

impl Endpoint {
    /// Wraps an already-dialed transport
    pub fn new(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }

    /// The RPC URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends a JSON-RPC request and decodes its result
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let value = self.transport.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The chain id the remote reports
    pub async fn chain_id(&self) -> Result<u64> {
        let hex: String = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&hex)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("url", &self.url).finish()
    }
}

/// Chain-id-validated endpoints for one network
pub struct EndpointPool {
    network: Network,
    connector: Arc<dyn Connector>,
    quorum: usize,
    live: RwLock<Vec<Arc<Endpoint>>>,
}

impl EndpointPool {
    /// Creates an empty pool; nothing is dialed until [`EndpointPool::connect`]
    pub fn new(network: Network, connector: Arc<dyn Connector>, quorum: usize) -> Self {
        Self {
            network,
            connector,
            quorum,
            live: RwLock::new(Vec::new()),
        }
    }

    /// The network this pool serves
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Minimum number of usable endpoints
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Dials every configured URL not yet connected and keeps those whose
    /// chain id matches. Returns the number of usable endpoints.
    ///
    /// A no-op once the quorum is met. Individual dial or identity failures
    /// are logged and skipped; the call fails only when fewer than `quorum`
    /// endpoints survive.
    pub async fn connect(&self) -> Result<usize> {
        let mut live = self.live.write().await;
        if live.len() >= self.quorum {
            return Ok(live.len());
        }

        let pending: Vec<&String> = self
            .network
            .rpcs
            .iter()
            .filter(|url| !live.iter().any(|e| e.url() == url.as_str()))
            .collect();

        let dialed = join_all(pending.into_iter().map(|url| self.dial(url))).await;
        live.extend(dialed.into_iter().flatten());

        if live.len() < self.quorum {
            return Err(ProviderError::InsufficientEndpoints {
                quorum: self.quorum,
                chain_id: self.network.chain_id,
                found: live.len(),
            });
        }

        Ok(live.len())
    }

    async fn dial(&self, url: &str) -> Option<Arc<Endpoint>> {
        let transport = match self.connector.connect(url) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::debug!(network = %self.network.name, rpc = url, error = %e, "Could not dial");
                return None;
            }
        };
        let endpoint = Endpoint::new(url, transport);

        match with_timeout(CONNECT_TIMEOUT, "eth_chainId", endpoint.chain_id()).await {
            Ok(Ok(chain_id)) if chain_id == self.network.chain_id => {
                tracing::debug!(network = %self.network.name, rpc = url, "Connected");
                Some(Arc::new(endpoint))
            }
            Ok(Ok(chain_id)) => {
                tracing::debug!(
                    network = %self.network.name,
                    rpc = url,
                    expected = self.network.chain_id,
                    got = chain_id,
                    "Chain id mismatch, discarding endpoint"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::debug!(network = %self.network.name, rpc = url, error = %e, "Chain id check failed");
                None
            }
            Err(e) => {
                tracing::debug!(network = %self.network.name, rpc = url, error = %e, "Chain id check timed out");
                None
            }
        }
    }

    /// Snapshot of the usable endpoints, in the order they were accepted
    pub async fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.live.read().await.clone()
    }

    /// Number of usable endpoints
    pub async fn len(&self) -> usize {
        self.live.read().await.len()
    }

    /// Whether no endpoint is usable yet
    pub async fn is_empty(&self) -> bool {
        self.live.read().await.is_empty()
    }
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("network", &self.network.name)
            .field("quorum", &self.quorum)
            .finish()
    }
}
