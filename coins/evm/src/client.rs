//! Consensus-checked EVM queries
//!
//! [`EvmClient`] turns the generic [`ConsensusClient`] into typed chain reads.
//! Documents are voted on by their canonical JSON encoding, scalars by their
//! decimal or hex form.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use hodl_provider::{
    parse_quantity, ConsensusClient, Connector, ExplorerClient, InternalTransfer, Network,
    ProviderError,
};

use crate::abi::{
    balance_of_calldata, decimals_calldata, decode_string, decode_u256, decode_uint8,
    symbol_calldata,
};
use crate::tokens::{token_key, TokenField, TokenMetadata, TokenMetadataCache};
use crate::types::{BlockHeader, Receipt, Transaction};
use crate::{Error, Result};

/// Where address history and internal transfers come from
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Lowercase hashes of every transaction touching `address` in the range
    async fn transaction_hashes(
        &self,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> hodl_provider::Result<BTreeSet<String>>;

    /// Value transfers performed inside `tx_hash`
    async fn internal_transfers(&self, tx_hash: &str)
        -> hodl_provider::Result<Vec<InternalTransfer>>;
}

#[async_trait]
impl HistorySource for ExplorerClient {
    async fn transaction_hashes(
        &self,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> hodl_provider::Result<BTreeSet<String>> {
        self.all_transaction_hashes(address, start_block, end_block)
            .await
    }

    async fn internal_transfers(
        &self,
        tx_hash: &str,
    ) -> hodl_provider::Result<Vec<InternalTransfer>> {
        ExplorerClient::internal_transfers(self, tx_hash).await
    }
}

/// Typed, quorum-checked access to one EVM network
pub struct EvmClient {
    consensus: ConsensusClient,
    history: Option<Arc<dyn HistorySource>>,
    tokens: Arc<TokenMetadataCache>,
}

impl EvmClient {
    /// Creates a client from its parts
    pub fn new(
        consensus: ConsensusClient,
        history: Option<Arc<dyn HistorySource>>,
        tokens: Arc<TokenMetadataCache>,
    ) -> Self {
        Self {
            consensus,
            history,
            tokens,
        }
    }

    /// Creates a client dialing RPCs through `connector`, with no history source
    pub fn with_connector(
        network: Network,
        connector: Arc<dyn Connector>,
        tokens: Arc<TokenMetadataCache>,
    ) -> Self {
        Self::new(ConsensusClient::new(network, connector), None, tokens)
    }

    /// Creates an HTTP client, attaching the network's explorer when configured
    pub fn http(network: Network, tokens: Arc<TokenMetadataCache>) -> Result<Self> {
        let history: Option<Arc<dyn HistorySource>> = match ExplorerClient::new(&network) {
            Ok(explorer) => Some(Arc::new(explorer)),
            Err(ProviderError::NotConfigured(_)) => {
                if network.explorer.is_some() {
                    tracing::warn!(network = %network.name, "Explorer has no API key, history disabled");
                }
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(ConsensusClient::http(network)?, history, tokens))
    }

    /// Replaces the history source
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    /// The network served
    pub fn network(&self) -> &Network {
        self.consensus.network()
    }

    /// Short network name
    pub fn name(&self) -> &str {
        &self.consensus.network().name
    }

    /// The underlying consensus client
    pub fn consensus(&self) -> &ConsensusClient {
        &self.consensus
    }

    /// Whether address history can be enumerated
    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    /// Dials the network's endpoints until a quorum is usable
    pub async fn connect(&self) -> Result<usize> {
        Ok(self.consensus.connect().await?)
    }

    /// Latest block number
    pub async fn latest_block(&self) -> Result<u64> {
        let number = self
            .consensus
            .consensus_call(|endpoint| async move {
                let hex: String = endpoint.call("eth_blockNumber", json!([])).await?;
                let number = parse_quantity(&hex)?;
                Ok::<_, ProviderError>((number, number))
            })
            .await?;
        Ok(number)
    }

    /// A transaction by hash; `None` when the quorum agrees it is unknown
    pub async fn transaction(&self, hash: B256) -> Result<Option<Transaction>> {
        self.agreed_document("eth_getTransactionByHash", json!([hash]))
            .await
    }

    /// A receipt by transaction hash
    pub async fn receipt(&self, hash: B256) -> Result<Option<Receipt>> {
        self.agreed_document("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    /// A block header by block hash
    pub async fn block(&self, hash: B256) -> Result<Option<BlockHeader>> {
        self.agreed_document("eth_getBlockByHash", json!([hash, false]))
            .await
    }

    /// Native balance at the latest block
    pub async fn balance(&self, address: Address) -> Result<U256> {
        let balance = self
            .consensus
            .consensus_call(|endpoint| async move {
                let balance: U256 = endpoint
                    .call("eth_getBalance", json!([address, "latest"]))
                    .await?;
                Ok::<_, ProviderError>((balance, balance.to_string()))
            })
            .await?;
        Ok(balance)
    }

    /// Result of a read-only contract call at the latest block
    pub async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let data = &data;
        let result = self
            .consensus
            .consensus_call(|endpoint| async move {
                let result: Bytes = endpoint
                    .call(
                        "eth_call",
                        json!([{ "to": format!("{to:#x}"), "data": data }, "latest"]),
                    )
                    .await?;
                let key = result.to_string();
                Ok::<_, ProviderError>((result, key))
            })
            .await?;
        Ok(result)
    }

    /// ERC-20 balance of `owner`
    pub async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256> {
        let data = self.eth_call(token, balance_of_calldata(owner)).await?;
        decode_u256(&data)
    }

    /// Token decimals, resolved on chain at most once
    pub async fn decimals(&self, token: Address) -> Result<u8> {
        let key = token_key(self.name(), token, TokenField::Decimals);
        if let Some(decimals) = self.tokens.decimals(&key) {
            return Ok(decimals);
        }

        let data = self.eth_call(token, decimals_calldata()).await?;
        let decimals = decode_uint8(&data);
        self.tokens.remember_decimals(&key, decimals);
        Ok(decimals)
    }

    /// Token symbol, resolved on chain at most once
    pub async fn symbol(&self, token: Address) -> Result<String> {
        let key = token_key(self.name(), token, TokenField::Symbol);
        if let Some(symbol) = self.tokens.symbol(&key) {
            return Ok(symbol);
        }

        let data = self.eth_call(token, symbol_calldata()).await?;
        let symbol = decode_string(&data)?;
        self.tokens.remember_symbol(&key, &symbol);
        Ok(symbol)
    }

    /// Symbol and decimals together
    pub async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        Ok(TokenMetadata {
            symbol: self.symbol(token).await?,
            decimals: self.decimals(token).await?,
        })
    }

    /// Every transaction hash touching `address` in the block range
    pub async fn transaction_hashes(
        &self,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> Result<BTreeSet<String>> {
        let history = self.history_source()?;
        Ok(history
            .transaction_hashes(address, start_block, end_block)
            .await?)
    }

    /// Internal transfers of one transaction, straight from the explorer
    pub async fn internal_transfers(&self, tx_hash: &str) -> Result<Vec<InternalTransfer>> {
        let history = self.history_source()?;
        Ok(history.internal_transfers(tx_hash).await?)
    }

    fn history_source(&self) -> Result<&Arc<dyn HistorySource>> {
        self.history
            .as_ref()
            .ok_or_else(|| Error::NoExplorer(self.name().to_string()))
    }

    /// Runs `method(params)` and accepts the document a quorum returned
    async fn agreed_document<T>(&self, method: &'static str, params: Value) -> Result<Option<T>>
    where
        T: DeserializeOwned + Serialize,
    {
        let params = &params;
        let document = self
            .consensus
            .consensus_call(|endpoint| async move {
                let document: Option<T> = endpoint.call(method, params.clone()).await?;
                let key = serde_json::to_string(&document)?;
                Ok::<_, ProviderError>((document, key))
            })
            .await?;
        Ok(document)
    }
}

impl std::fmt::Debug for EvmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("network", &self.name())
            .field("has_history", &self.has_history())
            .finish()
    }
}

/// Connects every active client concurrently
///
/// Every client is returned. Those below quorum are logged here and skipped
/// with a reason by the ingestion stages, which retry the connection first.
pub async fn connect_all(clients: Vec<EvmClient>) -> Vec<Arc<EvmClient>> {
    join_all(clients.into_iter().map(|client| async move {
        if !client.network().deprecated {
            match client.connect().await {
                Ok(endpoints) => {
                    tracing::info!(network = %client.name(), endpoints, "Connected");
                }
                Err(e) => {
                    tracing::error!(network = %client.name(), error = %e, "Network unreachable");
                }
            }
        }
        Arc::new(client)
    }))
    .await
}
