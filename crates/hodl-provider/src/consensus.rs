//! Quorum consensus over untrusted RPC endpoints
//!
//! Every query yields a raw result and a comparison key. Raw results (whole
//! transactions, receipts) are not reliably comparable, so votes are counted
//! strictly on the key, and the first result seen for a key is kept as its
//! exemplar.
//!
//! One attempt probes up to `quorum` endpoints concurrently, then walks the
//! remaining endpoints one at a time until some key collects `quorum` votes.
//! Attempts are retried on a fixed delay so transient provider trouble is not
//! mistaken for disagreement.

use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use hodl_resilience::{with_backoff, with_timeout, BackoffConfig, Deadline, DeadlineError};

use crate::pool::{Endpoint, EndpointPool};
use crate::transport::{Connector, HttpConnector};
use crate::{Network, ProviderError, Result};

/// Endpoints that must agree before a value is trusted
pub const QUORUM: usize = 2;

/// Attempts made by the retry wrapper
pub const CONSENSUS_RETRIES: u32 = 5;

/// Tuning for [`ConsensusClient`]
#[derive(Debug, Clone)]
pub struct ConsensusSettings {
    /// Matching answers required
    pub quorum: usize,
    /// Attempts before giving up
    pub retries: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Budget for one whole attempt, shared by all of its probes
    pub attempt_timeout: Duration,
    /// Budget for a single endpoint's answer
    pub probe_timeout: Duration,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            quorum: QUORUM,
            retries: CONSENSUS_RETRIES,
            retry_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-attempt vote tally: key -> (votes, exemplar)
struct Tally<K, R> {
    quorum: usize,
    votes: HashMap<K, (usize, R)>,
}

impl<K: Eq + Hash, R> Tally<K, R> {
    fn new(quorum: usize) -> Self {
        Self {
            quorum,
            votes: HashMap::new(),
        }
    }

    /// Records a vote; returns the exemplar once its key reaches quorum
    fn vote(&mut self, key: K, result: R) -> Option<R> {
        match self.votes.entry(key) {
            Entry::Occupied(mut seen) => {
                seen.get_mut().0 += 1;
                if seen.get().0 >= self.quorum {
                    return Some(seen.remove().1);
                }
                None
            }
            Entry::Vacant(_) if self.quorum <= 1 => Some(result),
            Entry::Vacant(slot) => {
                slot.insert((1, result));
                None
            }
        }
    }
}

/// Quorum-checked client for one network
pub struct ConsensusClient {
    pool: EndpointPool,
    settings: ConsensusSettings,
}

impl ConsensusClient {
    /// Creates a client dialing through `connector`
    pub fn new(network: Network, connector: Arc<dyn Connector>) -> Self {
        Self::with_settings(network, connector, ConsensusSettings::default())
    }

    /// Creates a client with custom settings
    pub fn with_settings(
        network: Network,
        connector: Arc<dyn Connector>,
        settings: ConsensusSettings,
    ) -> Self {
        Self {
            pool: EndpointPool::new(network, connector, settings.quorum),
            settings,
        }
    }

    /// Creates a client speaking JSON-RPC over HTTP
    pub fn http(network: Network) -> Result<Self> {
        network.validate()?;
        Ok(Self::new(network, Arc::new(HttpConnector::new()?)))
    }

    /// The network served
    pub fn network(&self) -> &Network {
        self.pool.network()
    }

    /// The underlying endpoint pool
    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    /// Active settings
    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    /// Ensures the pool holds at least a quorum of endpoints
    pub async fn connect(&self) -> Result<usize> {
        self.pool.connect().await
    }

    /// Runs `query` until `quorum` endpoints agree on its comparison key
    ///
    /// Connects the pool first, then makes up to `retries` agreement attempts
    /// with a fixed delay in between. Returns the agreed exemplar or the last
    /// attempt's error.
    pub async fn consensus_call<R, K, F, Fut>(&self, query: F) -> Result<R>
    where
        K: Eq + Hash,
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<(R, K)>>,
    {
        self.connect().await?;
        self.ensure_agreement_with_retry(query).await
    }

    /// Retry wrapper around [`ConsensusClient::ensure_agreement`]
    pub async fn ensure_agreement_with_retry<R, K, F, Fut>(&self, query: F) -> Result<R>
    where
        K: Eq + Hash,
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<(R, K)>>,
    {
        let config = BackoffConfig::fixed(self.settings.retry_delay, self.settings.retries);
        let query = &query;
        with_backoff(config, move || self.ensure_agreement(query))
            .await
            .map_err(|e| e.last_error.unwrap_or(ProviderError::NoQuorum))
    }

    /// One agreement attempt
    pub async fn ensure_agreement<R, K, F, Fut>(&self, query: &F) -> Result<R>
    where
        K: Eq + Hash,
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<(R, K)>>,
    {
        let endpoints = self.pool.endpoints().await;
        let deadline = Deadline::new(self.settings.attempt_timeout);
        let mut tally = Tally::new(self.settings.quorum);

        let split = self.settings.quorum.min(endpoints.len());
        let (probe_set, remaining) = endpoints.split_at(split);

        let answers = join_all(
            probe_set
                .iter()
                .map(|endpoint| self.probe(&deadline, endpoint.clone(), query)),
        )
        .await;
        for (result, key) in answers.into_iter().flatten() {
            if let Some(agreed) = tally.vote(key, result) {
                return Ok(agreed);
            }
        }

        for endpoint in remaining {
            if let Some((result, key)) = self.probe(&deadline, endpoint.clone(), query).await {
                if let Some(agreed) = tally.vote(key, result) {
                    return Ok(agreed);
                }
            }
        }

        Err(ProviderError::NoQuorum)
    }

    async fn probe<R, K, F, Fut>(
        &self,
        deadline: &Deadline,
        endpoint: Arc<Endpoint>,
        query: &F,
    ) -> Option<(R, K)>
    where
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<(R, K)>>,
    {
        let network = &self.pool.network().name;
        let url = endpoint.url().to_string();
        let probe = with_timeout(self.settings.probe_timeout, "consensus probe", query(endpoint));
        match deadline.execute(probe).await {
            Ok(Ok(answer)) => {
                tracing::debug!(network = %network, rpc = %url, "Success");
                Some(answer)
            }
            Ok(Err(e)) => {
                tracing::debug!(network = %network, rpc = %url, error = %e, "Problem with endpoint");
                None
            }
            Err(DeadlineError::Inner(e)) => {
                tracing::debug!(network = %network, rpc = %url, error = %e, "Endpoint too slow");
                None
            }
            Err(DeadlineError::Expired) => {
                tracing::debug!(network = %network, rpc = %url, "Attempt deadline expired");
                None
            }
        }
    }
}

impl std::fmt::Debug for ConsensusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusClient")
            .field("pool", &self.pool)
            .field("settings", &self.settings)
            .finish()
    }
}
