//! # hodl EVM ingestion
//!
//! Builds an auditable local cache of on-chain history for a set of owned
//! addresses across EVM networks. Every chain read goes through a quorum of
//! independent RPC endpoints, so one stale or lying provider cannot put wrong
//! data into the cache.
//!
//! Ingestion has two stages:
//!
//! 1. [identify] enumerates the transaction hashes touching each address via
//!    the network's block explorer and records them in `evm_tx_hashes`.
//! 2. [fetch] turns those hashes into cached bundles of transaction, receipt,
//!    block header and internal transfers, retrying failed items in rounds.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hodl_evm::prelude::*;
//!
//! # async fn run() -> hodl_evm::Result<()> {
//! let config = Config::load("hodl.json")?;
//! let db = FileDb::open(&config.data_dir)?;
//! let tokens = Arc::new(TokenMetadataCache::open(&db)?);
//!
//! let clients = config
//!     .active_networks()
//!     .filter_map(|network| EvmClient::http(network.clone(), tokens.clone()).ok())
//!     .collect();
//! let clients = connect_all(clients).await;
//!
//! let identified = identify_all(&db, &clients, &config.addresses).await;
//! println!("{}", identified.summary());
//!
//! let hashes = hashes_to_fetch(&db)?;
//! for report in fetch_all(&db, &clients, hashes, config.fetch).await {
//!     println!("{report}");
//! }
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod abi;
mod client;
pub use client::{connect_all, EvmClient, HistorySource};
pub mod config;
pub use config::Config;
mod error;
pub use error::{Error, Result};
pub mod fetch;
pub use fetch::{fetch_all, hashes_to_fetch, FetchPipeline, FetchReport, FetchSettings};
pub mod identify;
pub use identify::{identify_all, IdentifyReport, TrackedHashes};
pub mod tokens;
pub use tokens::{TokenMetadata, TokenMetadataCache};
pub mod types;
pub use types::{BlockHeader, Receipt, Transaction};
pub mod prelude;

pub use alloy;
pub use hodl_provider;
pub use hodl_store;

/// Names of the cache collections
pub mod collections {
    /// Transactions keyed `{network}-{hash}`
    pub const TXS: &str = "txs";
    /// Receipts keyed `{network}-{hash}`
    pub const RECEIPTS: &str = "receipts";
    /// Block headers keyed `{network}-{block hash}`
    pub const BLOCKS: &str = "blocks";
    /// Internal transfers keyed `{network}-{hash}`
    pub const INTERNAL_TXS: &str = "internal_txs";
    /// Token symbol and decimals
    pub const TOKEN_DATA: &str = "token_data";
    /// Identified hashes keyed `{network}-{address}`
    pub const EVM_TX_HASHES: &str = "evm_tx_hashes";
}
