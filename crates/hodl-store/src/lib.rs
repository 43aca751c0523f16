//! # hodl store
//!
//! A tiny durable key-value store: one directory per collection, one
//! `<key>.json` file per entry. Entries are treated as write-once ground
//! truth by the ingestion pipeline, and the whole tree can be deleted to
//! force a full re-fetch.
//!
//! ## Example
//!
//! ```no_run
//! use hodl_store::FileDb;
//!
//! # fn main() -> hodl_store::Result<()> {
//! let db = FileDb::open("data")?;
//! let receipts = db.collection("receipts")?;
//! receipts.write("ethereum-0xabc", &serde_json::json!({ "gasUsed": "0x5208" }))?;
//! let cached: Option<serde_json::Value> = receipts.read("ethereum-0xabc")?;
//! assert!(cached.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{de::DeserializeOwned, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const FILE_EXTENSION: &str = "json";

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold the expected JSON
    #[error("Corrupt entry {key} in collection {collection}: {source}")]
    Corrupt {
        /// Collection name
        collection: String,
        /// Entry key
        key: String,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be serialized
    #[error("Could not serialize value for {key} in collection {collection}: {source}")]
    Serialize {
        /// Collection name
        collection: String,
        /// Entry key
        key: String,
        /// Encode error
        #[source]
        source: serde_json::Error,
    },

    /// Keys become file names, so separators and empty keys are refused
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),
}

impl StoreError {
    /// Whether the error means the entry is unreadable rather than the store being broken
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Root of the on-disk cache
#[derive(Debug, Clone)]
pub struct FileDb {
    root: PathBuf,
}

impl FileDb {
    /// Opens (creating if needed) a cache rooted at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Opens (creating if needed) the named collection
    pub fn collection(&self, name: &str) -> Result<Collection> {
        validate_key(name)?;
        let folder = self.root.join(name);
        std::fs::create_dir_all(&folder).map_err(io_err(&folder))?;
        Ok(Collection {
            name: name.to_string(),
            folder,
        })
    }

    /// Opens the named collection only if an earlier run created it
    pub fn existing_collection(&self, name: &str) -> Option<Collection> {
        let folder = self.root.join(name);
        folder.is_dir().then(|| Collection {
            name: name.to_string(),
            folder,
        })
    }
}

/// A named namespace of JSON entries
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    folder: PathBuf,
}

impl Collection {
    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the entries
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.folder.join(format!("{key}.{FILE_EXTENSION}")))
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Reads the raw bytes stored under `key`
    pub fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Reads and decodes the entry stored under `key`
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(data) = self.read_raw(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                collection: self.name.clone(),
                key: key.to_string(),
                source,
            })
    }

    /// Serializes `value` and stores it under `key`, replacing any previous entry
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value).map_err(|source| StoreError::Serialize {
            collection: self.name.clone(),
            key: key.to_string(),
            source,
        })?;
        self.write_raw(key, &data)
    }

    /// Stores already-encoded JSON under `key`
    ///
    /// The bytes land in a temporary file first and are renamed into place.
    pub fn write_raw(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.folder)
            .map_err(io_err(&self.folder))?;
        tmp.write_all(data).map_err(io_err(tmp.path()))?;
        tmp.persist(&path).map_err(|e| io_err(&path)(e.error))?;
        tracing::trace!(collection = %self.name, key, "Wrote cache entry");
        Ok(())
    }

    /// Lists entry keys, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.folder).map_err(io_err(&self.folder))?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.folder))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.contains('\0')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
