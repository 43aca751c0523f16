//! Identification stage
//!
//! Enumerates the transaction hashes touching each owned address and keeps
//! them in the `evm_tx_hashes` collection together with the block the scan
//! reached, so the next run only scans newer blocks.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

use hodl_store::{Collection, FileDb};

use crate::collections::EVM_TX_HASHES;
use crate::{EvmClient, Result};

/// Hashes known for one address on one network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedHashes {
    /// Network name
    pub network: String,
    /// Owned address
    pub address: Address,
    /// Last block covered by `txs`
    pub block: u64,
    /// Lowercase transaction hashes
    pub txs: BTreeSet<String>,
}

impl TrackedHashes {
    /// Collection key `{network}-{checksummed address}`
    pub fn key(network: &str, address: Address) -> String {
        format!("{network}-{}", address.to_checksum(None))
    }
}

/// Outcome of identifying every address on every network
#[derive(Debug, Default, Clone)]
pub struct IdentifyReport {
    /// Hash count per `"{label} ({network})"`
    pub hashes: BTreeMap<String, usize>,
    /// Failure per `"{label} ({network})"`
    pub errors: BTreeMap<String, String>,
    /// Networks left out, with the reason
    pub skipped: BTreeMap<String, String>,
}

impl IdentifyReport {
    /// Human readable multi-line summary
    pub fn summary(&self) -> String {
        self.to_string()
    }

    fn merge(&mut self, other: IdentifyReport) {
        self.hashes.extend(other.hashes);
        self.errors.extend(other.errors);
        self.skipped.extend(other.skipped);
    }
}

impl fmt::Display for IdentifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Identified transactions:")?;
        for (label, count) in &self.hashes {
            writeln!(f, "  {label}: {count}")?;
        }
        for (network, reason) in &self.skipped {
            writeln!(f, "  skipped {network}: {reason}")?;
        }
        for (label, error) in &self.errors {
            writeln!(f, "  failed {label}: {error}")?;
        }
        Ok(())
    }
}

/// Reads the stored entry for `address`, ignoring entries that belong elsewhere
pub fn stored_hashes(
    collection: &Collection,
    network: &str,
    address: Address,
) -> Option<TrackedHashes> {
    let key = TrackedHashes::key(network, address);
    match collection.read::<TrackedHashes>(&key) {
        Ok(Some(entry)) if entry.network == network && entry.address == address => Some(entry),
        Ok(Some(entry)) => {
            tracing::warn!(
                key,
                network = %entry.network,
                address = %entry.address,
                "Stored hashes belong to another address, rescanning"
            );
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Unreadable stored hashes, rescanning");
            None
        }
    }
}

/// Brings the stored hashes of one address up to the latest block
///
/// Returns the number of hashes now known for the address.
pub async fn identify_address(
    client: &EvmClient,
    collection: &Collection,
    address: Address,
) -> Result<usize> {
    let network = client.name();
    let known = stored_hashes(collection, network, address);
    let start = known.as_ref().map(|entry| entry.block);
    let mut txs = known.map(|entry| entry.txs).unwrap_or_default();

    let latest = client.latest_block().await?;
    let found = client
        .transaction_hashes(&format!("{address:#x}"), start, Some(latest))
        .await?;
    let before = txs.len();
    txs.extend(found);
    tracing::debug!(
        %network,
        %address,
        from_block = start.unwrap_or(0),
        to_block = latest,
        new = txs.len() - before,
        "Scanned address history"
    );

    let entry = TrackedHashes {
        network: network.to_string(),
        address,
        block: latest,
        txs,
    };
    collection.write(&TrackedHashes::key(network, address), &entry)?;
    Ok(entry.txs.len())
}

/// Identifies every address on one network, one address at a time
pub async fn identify_network(
    db: &FileDb,
    client: &EvmClient,
    addresses: &BTreeMap<String, Address>,
) -> IdentifyReport {
    let mut report = IdentifyReport::default();
    let name = client.name().to_string();

    if client.network().deprecated {
        report.skipped.insert(name, "deprecated".into());
        return report;
    }
    if !client.has_history() {
        report.skipped.insert(name, "no explorer configured".into());
        return report;
    }
    if let Err(e) = client.connect().await {
        report.skipped.insert(name, format!("unreachable: {e}"));
        return report;
    }
    let collection = match db.collection(EVM_TX_HASHES) {
        Ok(collection) => collection,
        Err(e) => {
            report.skipped.insert(name, e.to_string());
            return report;
        }
    };

    for (label, address) in addresses {
        let label = format!("{label} ({name})");
        match identify_address(client, &collection, *address).await {
            Ok(count) => {
                tracing::info!(%label, count, "Identified transactions");
                report.hashes.insert(label, count);
            }
            Err(e) => {
                tracing::error!(%label, error = %e, "Identification failed");
                report.errors.insert(label, e.to_string());
            }
        }
    }
    report
}

/// Identifies every address on every network, networks running concurrently
pub async fn identify_all(
    db: &FileDb,
    clients: &[Arc<EvmClient>],
    addresses: &BTreeMap<String, Address>,
) -> IdentifyReport {
    let mut tasks = JoinSet::new();
    for client in clients {
        let db = db.clone();
        let client = client.clone();
        let addresses = addresses.clone();
        tasks.spawn(async move { identify_network(&db, &client, &addresses).await });
    }

    let mut report = IdentifyReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(network_report) => report.merge(network_report),
            Err(e) => tracing::error!(error = %e, "Identification task died"),
        }
    }
    for (network, reason) in &report.skipped {
        tracing::info!(%network, %reason, "Skipped network");
    }
    report
}
