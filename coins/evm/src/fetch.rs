//! Fetch stage
//!
//! Turns identified hashes into cached bundles of transaction, receipt, block
//! header and internal transfers. Each part is read from the cache when
//! present and fetched through consensus otherwise. Any hash with a failed
//! part is retried in full on the next round, until nothing fails or the
//! round cap is hit.

use alloy::primitives::B256;
use futures::{stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

use hodl_provider::InternalTransfer;
use hodl_store::{Collection, FileDb};

use crate::collections::{BLOCKS, EVM_TX_HASHES, INTERNAL_TXS, RECEIPTS, TXS};
use crate::identify::TrackedHashes;
use crate::types::{parse_hash, BlockHeader, Receipt, Transaction};
use crate::{Error, EvmClient, Result};

fn default_max_rounds() -> usize {
    25
}

fn default_concurrency() -> usize {
    8
}

/// Fetch pipeline tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Rounds attempted before giving up on the remaining hashes
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Hashes in flight at once within a round
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            concurrency: default_concurrency(),
        }
    }
}

/// Where a cached part came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Already in the cache
    Cached,
    /// Fetched during this run and written to the cache
    Fetched,
    /// The network cannot provide it
    Unavailable,
}

/// Internal transfers of one transaction and how they were obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTransfers {
    /// Cache hit or fresh fetch
    pub origin: Origin,
    /// The transfers, possibly none
    pub transfers: Vec<InternalTransfer>,
}

/// Outcome of one network's fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Network name
    pub network: String,
    /// Rounds run
    pub rounds: usize,
    /// Hashes whose bundle is complete
    pub fetched: usize,
    /// Hashes given up on
    pub unresolved: BTreeSet<String>,
}

impl FetchReport {
    /// Whether every hash was fetched
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

impl fmt::Display for FetchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} fetched in {} round(s), {} unresolved",
            self.network,
            self.fetched,
            self.rounds,
            self.unresolved.len()
        )
    }
}

/// Unions the identified hashes of every address per network
///
/// Returns an empty map when nothing has been identified yet.
pub fn hashes_to_fetch(db: &FileDb) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut hashes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let Some(collection) = db.existing_collection(EVM_TX_HASHES) else {
        tracing::info!("No identified transactions yet, run identify first");
        return Ok(hashes);
    };

    for key in collection.list()? {
        match collection.read::<TrackedHashes>(&key) {
            Ok(Some(entry)) => hashes
                .entry(entry.network)
                .or_default()
                .extend(entry.txs.into_iter().map(|tx| tx.to_lowercase())),
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "Skipping unreadable identified hashes"),
        }
    }
    Ok(hashes)
}

/// Round-based fetcher for one network
#[derive(Debug)]
pub struct FetchPipeline {
    client: Arc<EvmClient>,
    settings: FetchSettings,
    txs: Collection,
    receipts: Collection,
    blocks: Collection,
    internal: Collection,
}

impl FetchPipeline {
    /// Creates a pipeline writing into `db`
    pub fn new(client: Arc<EvmClient>, db: &FileDb, settings: FetchSettings) -> Result<Self> {
        Ok(Self {
            client,
            settings,
            txs: db.collection(TXS)?,
            receipts: db.collection(RECEIPTS)?,
            blocks: db.collection(BLOCKS)?,
            internal: db.collection(INTERNAL_TXS)?,
        })
    }

    /// Network name
    pub fn network(&self) -> &str {
        self.client.name()
    }

    /// Fetches bundles for `hashes` until all succeed or the round cap is hit
    pub async fn run(&self, hashes: BTreeSet<String>) -> FetchReport {
        let mut report = FetchReport {
            network: self.network().to_string(),
            ..FetchReport::default()
        };
        if !self.client.has_history() {
            tracing::warn!(
                network = %report.network,
                "No explorer configured, internal transfers will be skipped"
            );
        }

        let mut pending = BTreeSet::new();
        for hash in hashes {
            match parse_hash(&hash) {
                Ok(parsed) => {
                    pending.insert(parsed);
                }
                Err(e) => {
                    tracing::warn!(network = %report.network, error = %e, "Skipping hash");
                    report.unresolved.insert(hash);
                }
            }
        }

        while !pending.is_empty() && report.rounds < self.settings.max_rounds {
            report.rounds += 1;
            let attempted = pending.len();
            let failed: BTreeSet<B256> = stream::iter(pending)
                .map(|hash| async move { (hash, self.bundle(hash).await) })
                .buffer_unordered(self.settings.concurrency.max(1))
                .filter_map(|(hash, complete)| async move { (!complete).then_some(hash) })
                .collect()
                .await;

            report.fetched += attempted - failed.len();
            tracing::info!(
                network = %report.network,
                round = report.rounds,
                attempted,
                failed = failed.len(),
                "Fetch round finished"
            );
            pending = failed;
        }

        if !pending.is_empty() {
            tracing::error!(
                network = %report.network,
                rounds = report.rounds,
                remaining = pending.len(),
                "Giving up on hashes after the round cap"
            );
            report
                .unresolved
                .extend(pending.into_iter().map(|hash| format!("{hash:#x}")));
        }
        report
    }

    /// Makes sure every part of `hash`'s bundle is cached
    ///
    /// Returns whether all parts succeeded; failures are logged.
    pub async fn bundle(&self, hash: B256) -> bool {
        let (tx, block, internal) = tokio::join!(
            self.transaction(hash),
            async {
                let receipt = self.receipt(hash).await?;
                self.block(receipt.block_hash).await
            },
            self.internal_transfers(hash),
        );

        let mut complete = true;
        for (part, outcome) in [
            ("transaction", tx.err()),
            ("receipt or block", block.err()),
            ("internal transfers", internal.err()),
        ] {
            if let Some(e) = outcome {
                tracing::warn!(network = %self.network(), hash = %hash, part, error = %e, "Fetch failed");
                complete = false;
            }
        }
        complete
    }

    /// The cached or freshly fetched transaction
    pub async fn transaction(&self, hash: B256) -> Result<Transaction> {
        let key = self.key(hash);
        let tx = match cached::<Transaction>(&self.txs, &key) {
            Some(tx) => tx,
            None => {
                let tx = self
                    .client
                    .transaction(hash)
                    .await?
                    .ok_or_else(|| Error::Empty {
                        what: "transaction",
                        key: key.clone(),
                    })?;
                if tx.is_deposit() {
                    self.txs
                        .write_raw(&key, &serde_json::to_vec(&tx.deposit_document())?)?;
                } else {
                    self.txs.write(&key, &tx)?;
                }
                tracing::info!(key, "Fetched transaction");
                tx
            }
        };
        if tx.is_suspicious() {
            tracing::warn!(key, "Suspicious transaction");
        }
        Ok(tx)
    }

    /// The cached or freshly fetched receipt
    pub async fn receipt(&self, hash: B256) -> Result<Receipt> {
        let key = self.key(hash);
        let receipt = match cached::<Receipt>(&self.receipts, &key) {
            Some(receipt) => receipt,
            None => {
                let receipt = self
                    .client
                    .receipt(hash)
                    .await?
                    .ok_or_else(|| Error::Empty {
                        what: "receipt",
                        key: key.clone(),
                    })?;
                self.receipts.write(&key, &receipt)?;
                tracing::info!(key, "Fetched receipt");
                receipt
            }
        };
        if receipt.is_suspicious() {
            tracing::warn!(key, "Suspicious receipt: no gas used and no logs");
        }
        Ok(receipt)
    }

    /// The cached or freshly fetched block header
    pub async fn block(&self, block_hash: B256) -> Result<BlockHeader> {
        let key = self.key(block_hash);
        let block = match cached::<BlockHeader>(&self.blocks, &key) {
            Some(block) => block,
            None => {
                let block = self
                    .client
                    .block(block_hash)
                    .await?
                    .ok_or_else(|| Error::Empty {
                        what: "block",
                        key: key.clone(),
                    })?;
                self.blocks.write(&key, &block)?;
                tracing::info!(key, "Fetched block");
                block
            }
        };
        if block.is_suspicious() {
            tracing::warn!(key, "Suspicious block header");
        }
        Ok(block)
    }

    /// The cached or freshly fetched internal transfers
    pub async fn internal_transfers(&self, hash: B256) -> Result<InternalTransfers> {
        if !self.client.has_history() {
            return Ok(InternalTransfers {
                origin: Origin::Unavailable,
                transfers: Vec::new(),
            });
        }

        let key = self.key(hash);
        if let Some(transfers) = cached::<Vec<InternalTransfer>>(&self.internal, &key) {
            return Ok(InternalTransfers {
                origin: Origin::Cached,
                transfers,
            });
        }

        let transfers = self
            .client
            .internal_transfers(&format!("{hash:#x}"))
            .await?;
        self.internal.write(&key, &transfers)?;
        tracing::info!(key, count = transfers.len(), "Fetched internal transfers");
        Ok(InternalTransfers {
            origin: Origin::Fetched,
            transfers,
        })
    }

    fn key(&self, hash: B256) -> String {
        format!("{}-{hash:#x}", self.network())
    }
}

fn cached<T: DeserializeOwned>(collection: &Collection, key: &str) -> Option<T> {
    match collection.read(key) {
        Ok(hit) => hit,
        Err(e) => {
            tracing::warn!(collection = %collection.name(), key, error = %e, "Refetching unreadable cache entry");
            None
        }
    }
}

/// Runs one pipeline per network concurrently
///
/// Deprecated networks and networks that cannot reach quorum are logged and
/// left out of the result; the others are not held back by them.
pub async fn fetch_all(
    db: &FileDb,
    clients: &[Arc<EvmClient>],
    mut hashes: BTreeMap<String, BTreeSet<String>>,
    settings: FetchSettings,
) -> Vec<FetchReport> {
    let mut tasks = JoinSet::new();
    for client in clients {
        if client.network().deprecated {
            tracing::info!(network = %client.name(), "Skipping deprecated network");
            continue;
        }
        let Some(network_hashes) = hashes.remove(client.name()) else {
            tracing::info!(network = %client.name(), "Nothing to fetch");
            continue;
        };

        let pipeline = match FetchPipeline::new(client.clone(), db, settings) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::error!(network = %client.name(), error = %e, "Cannot open cache");
                continue;
            }
        };
        tasks.spawn(async move {
            if let Err(e) = pipeline.client.connect().await {
                tracing::error!(network = %pipeline.network(), error = %e, "Network unreachable, skipping");
                return None;
            }
            Some(pipeline.run(network_hashes).await)
        });
    }
    for network in hashes.keys() {
        tracing::warn!(network, "Identified hashes for a network with no client, skipping");
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Fetch task died"),
        }
    }
    reports.sort_by(|a, b| a.network.cmp(&b.network));
    reports
}
