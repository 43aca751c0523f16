//! Etherscan-compatible history enumeration
//!
//! Explorers only expose an address's history as several independently
//! paginated lists (native, internal and one per token standard). The client
//! walks every list, unions the hashes, and funnels all requests through one
//! rate limiter so the API plan's requests-per-second is never exceeded.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use hodl_resilience::{with_linear_backoff, DefaultRetryClassifier, LinearBackoff};

use crate::transport::{HttpClientConfig, RateLimitConfig};
use crate::{Network, ProviderError, Result};

/// Records requested per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Etherscan serves at most `page * offset <= 10000` records per query
pub const DEFAULT_RESULT_WINDOW: usize = 10_000;

/// Explorer messages meaning "the list is exhausted"
const NO_RESULTS: [&str; 2] = ["No transactions found", "No records found"];

/// One of the explorer's per-address history lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    /// Plain transactions sent or received
    Normal,
    /// Value moved by contract calls
    Internal,
    /// ERC-20 transfer events
    Erc20,
    /// ERC-721 transfer events
    Erc721,
    /// ERC-1155 transfer events
    Erc1155,
}

impl HistoryKind {
    /// Every list, in the order they are walked
    pub const ALL: [HistoryKind; 5] = [
        HistoryKind::Normal,
        HistoryKind::Internal,
        HistoryKind::Erc20,
        HistoryKind::Erc721,
        HistoryKind::Erc1155,
    ];

    /// The `action` query parameter for this list
    pub fn action(self) -> &'static str {
        match self {
            HistoryKind::Normal => "txlist",
            HistoryKind::Internal => "txlistinternal",
            HistoryKind::Erc20 => "tokentx",
            HistoryKind::Erc721 => "tokennfttx",
            HistoryKind::Erc1155 => "token1155tx",
        }
    }
}

impl std::fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action())
    }
}

/// A value transfer performed inside a transaction's execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InternalTransfer {
    /// Block the parent transaction landed in
    pub block_number: String,
    /// Unix timestamp of that block
    pub time_stamp: String,
    /// Sending contract
    pub from: String,
    /// Recipient
    pub to: String,
    /// Amount in wei
    pub value: String,
    /// Address created, for `create` calls
    pub contract_address: String,
    /// Call input
    pub input: String,
    /// Trace type, e.g. `call`
    #[serde(rename = "type")]
    pub kind: String,
    /// Gas made available
    pub gas: String,
    /// Gas consumed
    pub gas_used: String,
    /// `"1"` when the call reverted
    pub is_error: String,
    /// Revert reason, if any
    pub err_code: String,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    #[serde(default)]
    hash: String,
    #[serde(default)]
    block_number: String,
}

/// Client for one network's block explorer
pub struct ExplorerClient {
    network: String,
    base_url: String,
    key: String,
    http: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    page_size: usize,
    result_window: usize,
    throttle: LinearBackoff,
}

impl ExplorerClient {
    /// Creates a client from the network's explorer settings
    pub fn new(network: &Network) -> Result<Self> {
        Self::with_http_config(network, HttpClientConfig::default())
    }

    /// Creates a client with custom HTTP settings
    pub fn with_http_config(network: &Network, http_config: HttpClientConfig) -> Result<Self> {
        let explorer = network
            .explorer
            .as_ref()
            .filter(|e| !e.url.is_empty() && !e.key.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured(network.name.clone()))?;

        let rate_limit = RateLimitConfig {
            requests_per_second: explorer.rps,
            burst_size: 1,
        };
        Ok(Self {
            network: network.name.clone(),
            base_url: explorer.url.clone(),
            key: explorer.key.clone(),
            http: http_config.build()?,
            limiter: rate_limit.limiter(),
            page_size: DEFAULT_PAGE_SIZE,
            result_window: DEFAULT_RESULT_WINDOW,
            throttle: LinearBackoff::default(),
        })
    }

    /// Sets the records requested per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets how many records one query may page through before the walk
    /// restarts from the last block seen
    pub fn with_result_window(mut self, result_window: usize) -> Self {
        self.result_window = result_window.max(1);
        self
    }

    /// Replaces the throttling schedule
    pub fn with_throttle(mut self, throttle: LinearBackoff) -> Self {
        self.throttle = throttle;
        self
    }

    /// The network's name
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Every transaction hash touching `address` within the block range,
    /// lowercased and deduplicated across all history lists
    pub async fn all_transaction_hashes(
        &self,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> Result<BTreeSet<String>> {
        let mut hashes = BTreeSet::new();
        for kind in HistoryKind::ALL {
            let found = self
                .transaction_hashes(kind, address, start_block, end_block)
                .await?;
            tracing::debug!(network = %self.network, address, kind = %kind, count = found.len(), "Listed history");
            hashes.extend(found);
        }
        Ok(hashes)
    }

    /// Walks every page of one history list
    ///
    /// Once the explorer's result window is exhausted the walk starts over at
    /// the block of the last record seen. Records in that block are listed
    /// twice; callers dedup.
    pub async fn transaction_hashes(
        &self,
        kind: HistoryKind,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        let mut window_start = start_block;
        let mut page = 1usize;

        loop {
            let mut params = vec![
                ("module", "account".to_string()),
                ("action", kind.action().to_string()),
                ("address", address.to_string()),
                ("page", page.to_string()),
                ("offset", self.page_size.to_string()),
                ("sort", "asc".to_string()),
            ];
            if let Some(start) = window_start {
                params.push(("startblock", start.to_string()));
            }
            if let Some(end) = end_block {
                params.push(("endblock", end.to_string()));
            }

            let entries: Vec<HistoryEntry> = match self.query(&params).await? {
                Some(result) => serde_json::from_value(result)?,
                None => break,
            };
            if entries.is_empty() {
                break;
            }

            let count = entries.len();
            let last_block = entries
                .last()
                .and_then(|entry| entry.block_number.parse::<u64>().ok());
            hashes.extend(
                entries
                    .into_iter()
                    .filter(|entry| !entry.hash.is_empty())
                    .map(|entry| entry.hash.to_lowercase()),
            );
            if count < self.page_size {
                break;
            }

            if (page + 1) * self.page_size <= self.result_window {
                page += 1;
                continue;
            }
            match last_block {
                Some(block) if Some(block) != window_start => {
                    tracing::debug!(network = %self.network, address, kind = %kind, block, "Result window exhausted, restarting");
                    window_start = Some(block);
                    page = 1;
                }
                _ => {
                    return Err(ProviderError::Explorer(format!(
                        "{kind} for {address} cannot be paged past {} records",
                        self.result_window
                    )))
                }
            }
        }

        Ok(hashes)
    }

    /// Internal transfers performed by one transaction
    pub async fn internal_transfers(&self, tx_hash: &str) -> Result<Vec<InternalTransfer>> {
        let params = [
            ("module", "account".to_string()),
            ("action", HistoryKind::Internal.action().to_string()),
            ("txhash", tx_hash.to_string()),
        ];
        match self.query(&params).await? {
            Some(result) => Ok(serde_json::from_value(result)?),
            None => Ok(Vec::new()),
        }
    }

    /// Issues one request, backing off while the explorer throttles
    async fn query(&self, params: &[(&str, String)]) -> Result<Option<Value>> {
        with_linear_backoff(self.throttle.clone(), ProviderError::is_throttling, || {
            self.request(params)
        })
        .await
        .map_err(|e| {
            e.last_error
                .unwrap_or_else(|| ProviderError::Explorer("request never attempted".into()))
        })
    }

    /// `Ok(None)` when the explorer reports an empty list
    async fn request(&self, params: &[(&str, String)]) -> Result<Option<Value>> {
        self.limiter.until_ready().await;

        let response = self
            .http
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", self.key.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::HttpStatus(response.status().as_u16()));
        }

        let body: ExplorerResponse = response.json().await?;
        if body.status == "1" {
            return Ok(Some(body.result));
        }

        let detail = match &body.result {
            Value::String(text) if !text.is_empty() => text.clone(),
            _ => body.message.clone(),
        };
        if NO_RESULTS
            .iter()
            .any(|signal| body.message.contains(signal) || detail.contains(signal))
        {
            return Ok(None);
        }
        if DefaultRetryClassifier::is_message_retryable(&detail) {
            return Err(ProviderError::RateLimited(detail));
        }
        Err(ProviderError::Explorer(detail))
    }
}

impl std::fmt::Debug for ExplorerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerClient")
            .field("network", &self.network)
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExplorerConfig;

    #[test]
    fn test_actions() {
        let actions: Vec<_> = HistoryKind::ALL.iter().map(|k| k.action()).collect();
        assert_eq!(
            actions,
            ["txlist", "txlistinternal", "tokentx", "tokennfttx", "token1155tx"]
        );
    }

    #[test]
    fn test_requires_explorer() {
        let bare = Network::new("base", 8453, "ETH");
        assert!(matches!(
            ExplorerClient::new(&bare),
            Err(ProviderError::NotConfigured(_))
        ));

        let keyless = bare
            .clone()
            .with_explorer(ExplorerConfig::new("https://api.basescan.org/api", ""));
        assert!(ExplorerClient::new(&keyless).is_err());

        let ok = bare.with_explorer(ExplorerConfig::new("https://api.basescan.org/api", "k"));
        assert_eq!(ExplorerClient::new(&ok).unwrap().network(), "base");
    }

    #[test]
    fn test_internal_transfer_shape() {
        let transfer: InternalTransfer = serde_json::from_str(
            r#"{
                "blockNumber": "110000000",
                "from": "0x4200000000000000000000000000000000000006",
                "to": "0xabc",
                "value": "1000000000000000",
                "type": "call",
                "isError": "0"
            }"#,
        )
        .unwrap();
        assert_eq!(transfer.kind, "call");
        assert_eq!(transfer.value, "1000000000000000");
        assert!(transfer.err_code.is_empty());

        let json = serde_json::to_value(&transfer).unwrap();
        assert_eq!(json["blockNumber"], "110000000");
        assert_eq!(json["type"], "call");
    }
}
