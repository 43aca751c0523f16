//! Token metadata memoization
//!
//! `decimals()` and `symbol()` never change for a deployed token, so each is
//! resolved on chain at most once per (network, token) and then served from
//! memory or from the `token_data` collection. One cache is built per process
//! and shared by every network's client.

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use hodl_store::{Collection, FileDb};

use crate::collections::TOKEN_DATA;
use crate::Result;

/// Symbol and decimals of a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Ticker symbol
    pub symbol: String,
    /// Decimal places
    pub decimals: u8,
}

/// Which metadata field a cache key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField {
    /// `decimals()`
    Decimals,
    /// `symbol()`
    Symbol,
}

impl TokenField {
    fn suffix(self) -> &'static str {
        match self {
            TokenField::Decimals => "decimals",
            TokenField::Symbol => "symbol",
        }
    }
}

/// Cache key `{network}-{checksummed token}-{field}`
pub fn token_key(network: &str, token: Address, field: TokenField) -> String {
    format!("{network}-{}-{}", token.to_checksum(None), field.suffix())
}

/// Two-level token metadata cache
#[derive(Debug, Default)]
pub struct TokenMetadataCache {
    decimals: DashMap<String, u8>,
    symbols: DashMap<String, String>,
    store: Option<Collection>,
}

impl TokenMetadataCache {
    /// A cache that forgets everything when the process exits
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A cache persisted in the database's `token_data` collection
    pub fn open(db: &FileDb) -> Result<Self> {
        Ok(Self {
            store: Some(db.collection(TOKEN_DATA)?),
            ..Self::default()
        })
    }

    /// Cached decimals, if known
    pub fn decimals(&self, key: &str) -> Option<u8> {
        lookup(&self.decimals, self.store.as_ref(), key)
    }

    /// Cached symbol, if known
    pub fn symbol(&self, key: &str) -> Option<String> {
        lookup(&self.symbols, self.store.as_ref(), key)
    }

    /// Records resolved decimals in both layers
    pub fn remember_decimals(&self, key: &str, decimals: u8) {
        persist(self.store.as_ref(), key, &decimals);
        self.decimals.insert(key.to_string(), decimals);
    }

    /// Records a resolved symbol in both layers
    pub fn remember_symbol(&self, key: &str, symbol: &str) {
        persist(self.store.as_ref(), key, symbol);
        self.symbols.insert(key.to_string(), symbol.to_string());
    }

    /// Entries held in memory
    pub fn len(&self) -> usize {
        self.decimals.len() + self.symbols.len()
    }

    /// Whether nothing is held in memory
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lookup<T>(memory: &DashMap<String, T>, store: Option<&Collection>, key: &str) -> Option<T>
where
    T: Clone + DeserializeOwned,
{
    if let Some(hit) = memory.get(key) {
        return Some(hit.value().clone());
    }

    match store?.read::<T>(key) {
        Ok(Some(value)) => {
            memory.insert(key.to_string(), value.clone());
            Some(value)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Unreadable token metadata, resolving again");
            None
        }
    }
}

fn persist<T: Serialize + ?Sized>(store: Option<&Collection>, key: &str, value: &T) {
    if let Some(store) = store {
        if let Err(e) = store.write(key, value) {
            tracing::warn!(key, error = %e, "Could not persist token metadata");
        }
    }
}
