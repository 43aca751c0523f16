//! JSON-RPC transport
//!
//! [`Transport`] is the seam between the quorum logic and the wire: the HTTP
//! implementation posts JSON-RPC envelopes through a pooled `reqwest` client,
//! while tests plug in scripted endpoints.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::{ProviderError, Result};

/// A connection able to answer raw JSON-RPC requests
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `method(params)` and returns the `result` member (`null` when absent)
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// Opens transports for RPC URLs
pub trait Connector: Send + Sync {
    /// Dials `url`
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout
    pub pool_idle_timeout_secs: u64,
    /// Connection timeout
    pub connect_timeout_secs: u64,
    /// Request timeout
    pub request_timeout_secs: u64,
    /// User agent string
    pub user_agent: String,
    /// Enable gzip compression
    pub gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            pool_idle_timeout_secs: 90,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            user_agent: format!("hodl/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
        }
    }
}

impl HttpClientConfig {
    /// Builds a pooled `reqwest` client from this configuration
    pub fn build(&self) -> Result<Client> {
        Client::builder()
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .user_agent(&self.user_agent)
            .gzip(self.gzip)
            .build()
            .map_err(|e| ProviderError::ConnectionFailed(e.to_string()))
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst size (max requests in a burst)
    pub burst_size: u32,
}

impl RateLimitConfig {
    pub(crate) fn limiter(&self) -> RateLimiter<NotKeyed, InMemoryState, DefaultClock> {
        let rps = NonZeroU32::new(self.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(rps);
        RateLimiter::direct(Quota::per_second(rps).allow_burst(burst))
    }
}

/// RPC request payload
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<T: Serialize> {
    /// JSON-RPC version
    pub jsonrpc: &'static str,
    /// Method name
    pub method: String,
    /// Parameters
    pub params: T,
    /// Request ID
    pub id: u64,
}

impl<T: Serialize> JsonRpcRequest<T> {
    /// Creates a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: T, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP client with connection pooling
pub struct RpcClient {
    client: Client,
    request_id: AtomicU64,
}

impl RpcClient {
    /// Creates a new RPC client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new RPC client with custom configuration
    pub fn with_config(http_config: HttpClientConfig) -> Result<Self> {
        Ok(Self {
            client: http_config.build()?,
            request_id: AtomicU64::new(1),
        })
    }

    /// Makes a JSON-RPC request
    ///
    /// A `null` or missing `result` deserializes as JSON `null`, so callers
    /// asking for `Option<T>` see `None` rather than an error.
    pub async fn rpc_call<P, R>(&self, url: &str, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(method, params, id);

        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus(response.status().as_u16()));
        }

        let rpc_response: JsonRpcResponse = response.json().await?;
        if let Some(error) = rpc_response.error {
            return Err(ProviderError::RpcError {
                code: error.code,
                message: error.message,
            });
        }

        Ok(serde_json::from_value(
            rpc_response.result.unwrap_or(Value::Null),
        )?)
    }

    /// Returns the number of requests made
    pub fn request_count(&self) -> u64 {
        self.request_id.load(Ordering::SeqCst) - 1
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("request_count", &self.request_count())
            .finish()
    }
}

/// A JSON-RPC endpoint reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    client: Arc<RpcClient>,
}

impl HttpTransport {
    /// Creates a transport for `url` sharing `client`'s connection pool
    pub fn new(url: impl Into<String>, client: Arc<RpcClient>) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.client.rpc_call(&self.url, method, params).await
    }
}

/// Dials HTTP(S) RPC URLs through one shared client
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: Arc<RpcClient>,
}

impl HttpConnector {
    /// Creates a connector with default HTTP settings
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Arc::new(RpcClient::new()?),
        })
    }
}

impl Connector for HttpConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>> {
        let parsed = Url::parse(url).map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::InvalidUrl(format!(
                "unsupported scheme in {url}"
            )));
        }
        Ok(Arc::new(HttpTransport::new(url, self.client.clone())))
    }
}
