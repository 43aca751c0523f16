//! # hodl testing
//!
//! In-process stand-ins for JSON-RPC providers:
//! - [`MockTransport`] answers `eth_chainId` with a fixed id and delegates
//!   every other method to a scripted handler, counting calls per method.
//! - [`MockConnector`] maps RPC URLs to mock transports so an
//!   `EndpointPool` can be built without sockets.
//! - [`ChainFixture`] serves transactions, receipts, blocks and `eth_call`
//!   results from in-memory maps.
//! - [`flaky`] wraps a handler so calls fail at random.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hodl_testing::*;
//!
//! let connector = MockConnector::new()
//!     .with("mock://a", MockTransport::answering(10, json!("0x10")))
//!     .with("mock://b", MockTransport::answering(10, json!("0x10")));
//! let client = ConsensusClient::new(mock_network("optimism", 10, &connector), Arc::new(connector));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hodl_provider::{Connector, Network, ProviderError, Result, Transport};

/// Scripted answer for one JSON-RPC call
pub type Handler = Arc<dyn Fn(&str, &Value) -> Result<Value> + Send + Sync>;

// ============================================================================
// Transport
// ============================================================================

/// A scripted endpoint
pub struct MockTransport {
    chain_id: u64,
    handler: Handler,
    latency: Duration,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    /// An endpoint on `chain_id` answering `null` to everything
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            handler: Arc::new(|_: &str, _: &Value| Ok(Value::Null)),
            latency: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// An endpoint answering every call with `value`
    pub fn answering(chain_id: u64, value: Value) -> Self {
        Self::new(chain_id).with_handler(move |_, _| Ok(value.clone()))
    }

    /// An endpoint failing every call
    pub fn failing(chain_id: u64) -> Self {
        Self::new(chain_id)
            .with_handler(|method, _| Err(ProviderError::ConnectionFailed(format!("{method} refused"))))
    }

    /// Replaces the handler
    pub fn with_handler(
        mut self,
        handler: impl Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Uses a shared handler
    pub fn with_shared_handler(mut self, handler: Handler) -> Self {
        self.handler = handler;
        self
    }

    /// Delays every answer except `eth_chainId`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls received, not counting `eth_chainId`
    pub fn calls(&self) -> usize {
        self.lock_calls()
            .iter()
            .filter(|(method, _)| method.as_str() != "eth_chainId")
            .map(|(_, count)| count)
            .sum()
    }

    /// Calls received for `method`
    pub fn calls_for(&self, method: &str) -> usize {
        self.lock_calls().get(method).copied().unwrap_or(0)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        *self.lock_calls().entry(method.to_string()).or_insert(0) += 1;

        if method == "eth_chainId" {
            return Ok(json!(format!("0x{:x}", self.chain_id)));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.handler)(method, &params)
    }
}

/// Shares one transport between the connector and the test body
#[derive(Clone)]
struct SharedTransport(Arc<MockTransport>);

#[async_trait]
impl Transport for SharedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.0.request(method, params).await
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Maps URLs to scripted endpoints; unknown URLs fail to dial
#[derive(Clone, Default)]
pub struct MockConnector {
    endpoints: Vec<(String, Arc<MockTransport>)>,
}

impl MockConnector {
    /// An empty connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` under `url`
    pub fn with(mut self, url: impl Into<String>, transport: MockTransport) -> Self {
        self.endpoints.push((url.into(), Arc::new(transport)));
        self
    }

    /// Registered URLs, in registration order
    pub fn urls(&self) -> Vec<String> {
        self.endpoints.iter().map(|(url, _)| url.clone()).collect()
    }

    /// The transport registered under `url`
    pub fn transport(&self, url: &str) -> Option<Arc<MockTransport>> {
        self.endpoints
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, t)| t.clone())
    }

    /// Calls received by all transports, not counting `eth_chainId`
    pub fn total_calls(&self) -> usize {
        self.endpoints.iter().map(|(_, t)| t.calls()).sum()
    }

    /// Calls for `method` received by all transports
    pub fn calls_for(&self, method: &str) -> usize {
        self.endpoints.iter().map(|(_, t)| t.calls_for(method)).sum()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>> {
        self.transport(url)
            .map(|t| Arc::new(SharedTransport(t)) as Arc<dyn Transport>)
            .ok_or_else(|| ProviderError::ConnectionFailed(format!("no mock for {url}")))
    }
}

/// A network whose RPC URLs are the connector's registered URLs
pub fn mock_network(name: &str, chain_id: u64, connector: &MockConnector) -> Network {
    connector
        .urls()
        .into_iter()
        .fold(Network::new(name, chain_id, "ETH"), |network, url| {
            network.with_rpc(url)
        })
}

/// `count` endpoints on `chain_id` sharing one handler, at `mock://{name}/{i}`
pub fn uniform_connector(name: &str, chain_id: u64, count: usize, handler: Handler) -> MockConnector {
    (0..count).fold(MockConnector::new(), |connector, i| {
        connector.with(
            format!("mock://{name}/{i}"),
            MockTransport::new(chain_id).with_shared_handler(handler.clone()),
        )
    })
}

/// Wraps `inner` so each call fails with probability `failure_rate`
pub fn flaky(failure_rate: f64, inner: Handler) -> Handler {
    Arc::new(move |method: &str, params: &Value| {
        if rand::thread_rng().gen_bool(failure_rate.clamp(0.0, 1.0)) {
            return Err(ProviderError::ConnectionFailed(format!("{method} dropped")));
        }
        inner(method, params)
    })
}

// ============================================================================
// Chain fixture
// ============================================================================

/// In-memory chain state served over JSON-RPC
#[derive(Debug, Clone, Default)]
pub struct ChainFixture {
    /// Latest block number
    pub latest_block: u64,
    /// Transactions by lowercase hash
    pub transactions: HashMap<String, Value>,
    /// Receipts by lowercase transaction hash
    pub receipts: HashMap<String, Value>,
    /// Block headers by lowercase block hash
    pub blocks: HashMap<String, Value>,
    /// Native balances by lowercase address, as hex quantities
    pub balances: HashMap<String, String>,
    /// `eth_call` results by (lowercase `to`, calldata)
    pub calls: HashMap<(String, String), String>,
}

impl ChainFixture {
    /// An empty chain at block zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transaction, its receipt and its block
    pub fn with_bundle(mut self, tx: Value, receipt: Value, block: Value) -> Self {
        let hash = field(&tx, "hash");
        self.receipts.insert(hash.clone(), receipt);
        self.transactions.insert(hash, tx);
        self.blocks.insert(field(&block, "hash"), block);
        self
    }

    /// Scripts an `eth_call` result
    pub fn with_call(mut self, to: &str, data: &str, result: &str) -> Self {
        self.calls
            .insert((to.to_lowercase(), data.to_string()), result.to_string());
        self
    }

    /// Sets the latest block number
    pub fn with_latest_block(mut self, number: u64) -> Self {
        self.latest_block = number;
        self
    }

    /// Sets a native balance
    pub fn with_balance(mut self, address: &str, wei: u128) -> Self {
        self.balances
            .insert(address.to_lowercase(), format!("0x{wei:x}"));
        self
    }

    /// Answers one JSON-RPC call from the fixture
    pub fn answer(&self, method: &str, params: &Value) -> Result<Value> {
        let first = params
            .get(0)
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default();

        let answer = match method {
            "eth_blockNumber" => json!(format!("0x{:x}", self.latest_block)),
            "eth_getTransactionByHash" => self.transactions.get(&first).cloned().unwrap_or(Value::Null),
            "eth_getTransactionReceipt" => self.receipts.get(&first).cloned().unwrap_or(Value::Null),
            "eth_getBlockByHash" => self.blocks.get(&first).cloned().unwrap_or(Value::Null),
            "eth_getBalance" => json!(self.balances.get(&first).cloned().unwrap_or_else(|| "0x0".into())),
            "eth_call" => {
                let call = &params[0];
                let key = (
                    call["to"].as_str().unwrap_or_default().to_lowercase(),
                    call["data"]
                        .as_str()
                        .or_else(|| call["input"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                );
                match self.calls.get(&key) {
                    Some(result) => json!(result),
                    None => {
                        return Err(ProviderError::RpcError {
                            code: -32000,
                            message: "execution reverted".into(),
                        })
                    }
                }
            }
            other => {
                return Err(ProviderError::RpcError {
                    code: -32601,
                    message: format!("method {other} not found"),
                })
            }
        };
        Ok(answer)
    }

    /// The fixture as a shareable handler
    pub fn handler(self) -> Handler {
        let fixture = Arc::new(self);
        Arc::new(move |method: &str, params: &Value| fixture.answer(method, params))
    }
}

fn field(value: &Value, name: &str) -> String {
    value[name].as_str().unwrap_or_default().to_lowercase()
}
