//! Wire documents for transactions, receipts and block headers
//!
//! Only the fields the pipeline inspects are typed; everything else a provider
//! returns is kept verbatim in `extra`, so cached documents lose nothing.
//! Serialization is deterministic (named fields, then `extra` in key order),
//! which makes the serialized form usable as a consensus key.

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Transaction type of sidechain-synthesized deposit transactions
pub const DEPOSIT_TX_TYPE: u64 = 0x7e;

/// Parses a hex transaction or block hash
pub fn parse_hash(value: &str) -> Result<B256> {
    value.parse().map_err(|_| Error::Invalid {
        kind: "hash",
        value: value.to_string(),
    })
}

/// A transaction as returned by `eth_getTransactionByHash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash
    pub hash: B256,
    /// EIP-2718 type; absent on very old providers
    #[serde(rename = "type", default)]
    pub tx_type: U64,
    /// Sender nonce
    #[serde(default)]
    pub nonce: U64,
    /// Sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Recipient; `None` for contract creation
    #[serde(default)]
    pub to: Option<Address>,
    /// Value in wei
    #[serde(default)]
    pub value: U256,
    /// Gas limit
    #[serde(default)]
    pub gas: U64,
    /// Gas price, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    /// Calldata
    #[serde(default)]
    pub input: Bytes,
    /// Containing block; `None` while pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    /// Containing block number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<U64>,
    /// L1 origin of a deposit transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<B256>,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Transaction {
    /// Whether this is a sidechain deposit transaction
    pub fn is_deposit(&self) -> bool {
        self.tx_type == U64::from(DEPOSIT_TX_TYPE)
    }

    /// Legacy-shaped stand-in for a deposit transaction
    ///
    /// Deposits carry no signature, so the document is built from the plain
    /// call fields with zero signature values, then stamped with the deposit's
    /// own type, sender, hash and source hash.
    pub fn deposit_document(&self) -> Value {
        let mut doc = json!({
            "type": "0x0",
            "nonce": self.nonce,
            "gasPrice": self.gas_price.unwrap_or_default(),
            "gas": self.gas,
            "to": self.to.map(|to| format!("{to:#x}")),
            "value": self.value,
            "input": self.input,
            "v": "0x0",
            "r": "0x0",
            "s": "0x0",
        });
        doc["type"] = json!(format!("0x{DEPOSIT_TX_TYPE:x}"));
        doc["hash"] = json!(format!("{:#x}", self.hash));
        doc["from"] = match self.from {
            Some(from) => json!(format!("{from:#x}")),
            None => Value::Null,
        };
        doc["sourceHash"] = json!(format!("{:#x}", self.source_hash.unwrap_or_default()));
        doc
    }

    /// Whether the transaction looks structurally broken
    pub fn is_suspicious(&self) -> bool {
        self.hash.is_zero()
    }
}

/// An event log inside a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics
    #[serde(default)]
    pub topics: Vec<B256>,
    /// Unindexed data
    #[serde(default)]
    pub data: Bytes,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A receipt as returned by `eth_getTransactionReceipt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Transaction hash
    pub transaction_hash: B256,
    /// Containing block
    pub block_hash: B256,
    /// Containing block number
    #[serde(default)]
    pub block_number: U64,
    /// Gas consumed by this transaction
    #[serde(default)]
    pub gas_used: U64,
    /// `1` on success, `0` on revert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<U64>,
    /// Emitted logs
    #[serde(default)]
    pub logs: Vec<Log>,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Receipt {
    /// A receipt using no gas and emitting nothing is probably empty
    pub fn is_suspicious(&self) -> bool {
        self.gas_used.is_zero() && self.logs.is_empty()
    }

    /// Whether execution succeeded
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s == U64::from(1))
    }
}

/// A block as returned by `eth_getBlockByHash(hash, false)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    /// Block hash
    pub hash: B256,
    /// Parent block hash
    pub parent_hash: B256,
    /// Height
    pub number: U64,
    /// Unix timestamp
    #[serde(default)]
    pub timestamp: U64,
    /// Gas limit
    #[serde(default)]
    pub gas_limit: U64,
    /// Gas used
    #[serde(default)]
    pub gas_used: U64,
    /// Remaining provider fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BlockHeader {
    /// Headers with a zero hash or timestamp, or more gas used than allowed
    pub fn is_suspicious(&self) -> bool {
        self.hash.is_zero() || self.timestamp.is_zero() || self.gas_used > self.gas_limit
    }
}
