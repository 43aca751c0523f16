//! Shared fixtures for the ingestion tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hodl_evm::{EvmClient, HistorySource, TokenMetadataCache};
use hodl_provider::{InternalTransfer, ProviderError};
use hodl_testing::{mock_network, uniform_connector, ChainFixture, Handler, MockConnector};

pub const CHAIN_ID: u64 = 10;

pub fn hash(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(32))
}

pub fn block_hash(byte: u8) -> String {
    format!("0x{}", format!("{:02x}", byte.wrapping_add(0x80)).repeat(32))
}

/// Transaction, receipt and block for the transaction `hash(byte)`
pub fn bundle(byte: u8) -> (Value, Value, Value) {
    let tx = json!({
        "hash": hash(byte),
        "type": "0x2",
        "nonce": format!("0x{byte:x}"),
        "from": "0x00000000000000000000000000000000000000aa",
        "to": "0x00000000000000000000000000000000000000bb",
        "value": "0xde0b6b3a7640000",
        "gas": "0x5208",
        "gasPrice": "0x3b9aca00",
        "input": "0x",
        "blockHash": block_hash(byte),
        "blockNumber": "0x10",
        "chainId": "0xa",
    });
    let receipt = json!({
        "transactionHash": hash(byte),
        "blockHash": block_hash(byte),
        "blockNumber": "0x10",
        "gasUsed": "0x5208",
        "status": "0x1",
        "logs": [],
    });
    let block = json!({
        "hash": block_hash(byte),
        "parentHash": hash(0xff),
        "number": "0x10",
        "timestamp": "0x65a0c0de",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "transactions": [hash(byte)],
    });
    (tx, receipt, block)
}

/// A chain holding the bundles for every byte in `bytes`
pub fn chain(bytes: impl IntoIterator<Item = u8>) -> ChainFixture {
    bytes
        .into_iter()
        .fold(ChainFixture::new().with_latest_block(100), |fixture, byte| {
            let (tx, receipt, block) = bundle(byte);
            fixture.with_bundle(tx, receipt, block)
        })
}

/// Three endpoints serving `handler`
pub fn connector(handler: Handler) -> MockConnector {
    uniform_connector("optimism", CHAIN_ID, 3, handler)
}

pub fn client(connector: &MockConnector, tokens: Arc<TokenMetadataCache>) -> EvmClient {
    EvmClient::with_connector(
        mock_network("optimism", CHAIN_ID, connector),
        Arc::new(connector.clone()),
        tokens,
    )
}

/// History source answering from fixed maps and recording every request
#[derive(Default)]
pub struct ScriptedHistory {
    pub hashes: BTreeSet<String>,
    pub internal: HashMap<String, Vec<InternalTransfer>>,
    pub ranges: Mutex<Vec<(String, Option<u64>, Option<u64>)>>,
    pub internal_calls: Mutex<usize>,
    pub fail: bool,
}

impl ScriptedHistory {
    pub fn with_hashes(hashes: &[String]) -> Self {
        Self {
            hashes: hashes.iter().cloned().collect(),
            ..Self::default()
        }
    }

    pub fn ranges(&self) -> Vec<(String, Option<u64>, Option<u64>)> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn internal_calls(&self) -> usize {
        *self.internal_calls.lock().unwrap()
    }
}

#[async_trait]
impl HistorySource for ScriptedHistory {
    async fn transaction_hashes(
        &self,
        address: &str,
        start_block: Option<u64>,
        end_block: Option<u64>,
    ) -> hodl_provider::Result<BTreeSet<String>> {
        self.ranges
            .lock()
            .unwrap()
            .push((address.to_string(), start_block, end_block));
        if self.fail {
            return Err(ProviderError::Explorer("Invalid API Key".into()));
        }
        Ok(self.hashes.clone())
    }

    async fn internal_transfers(
        &self,
        tx_hash: &str,
    ) -> hodl_provider::Result<Vec<InternalTransfer>> {
        *self.internal_calls.lock().unwrap() += 1;
        Ok(self.internal.get(tx_hash).cloned().unwrap_or_default())
    }
}

/// Every file under `root` with its bytes
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.insert(path.clone(), std::fs::read(&path).unwrap());
            }
        }
    }
    files
}

/// A chain with no transactions, at block 100
pub fn idle_chain() -> ChainFixture {
    ChainFixture::new().with_latest_block(100)
}
