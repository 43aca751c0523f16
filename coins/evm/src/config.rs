//! Run configuration
//!
//! Loaded from a JSON file such as:
//!
//! ```json
//! {
//!   "data_dir": "data",
//!   "networks": [
//!     {
//!       "name": "optimism",
//!       "chain_id": 10,
//!       "native_asset": "ETH",
//!       "rpcs": ["https://mainnet.optimism.io", "https://optimism.publicnode.com"],
//!       "explorer": { "url": "https://api-optimistic.etherscan.io/api", "rps": 5 }
//!     }
//!   ],
//!   "addresses": { "hot": "0x00000000000000000000000000000000000000aa" },
//!   "fetch": { "max_rounds": 25, "concurrency": 8 }
//! }
//! ```
//!
//! Explorer keys are usually kept out of the file and supplied through
//! `HODL_<NETWORK>_EXPLORER_KEY` instead.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use hodl_provider::Network;

use crate::fetch::FetchSettings;
use crate::{Error, Result};

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Everything a run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the durable cache
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Networks to ingest, in priority order
    pub networks: Vec<Network>,
    /// Owned addresses by label
    #[serde(default)]
    pub addresses: BTreeMap<String, Address>,
    /// Fetch pipeline tuning
    #[serde(default)]
    pub fetch: FetchSettings,
}

impl Config {
    /// Reads, applies environment overrides and validates a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::parse(&text)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a config document without touching the environment
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Name of the variable overriding a network's explorer key
    pub fn explorer_key_var(network: &str) -> String {
        format!(
            "HODL_{}_EXPLORER_KEY",
            network.to_uppercase().replace(['-', ' '], "_")
        )
    }

    /// Overrides explorer keys from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for network in &mut self.networks {
            let Some(explorer) = network.explorer.as_mut() else {
                continue;
            };
            if let Some(key) = lookup(&Self::explorer_key_var(&network.name)) {
                if !key.is_empty() {
                    explorer.key = key;
                }
            }
        }
    }

    /// Rejects duplicate names and malformed explorer URLs
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.name.as_str()) {
                return Err(Error::Config(format!("duplicate network {}", network.name)));
            }
            network
                .validate()
                .map_err(|e| Error::Config(format!("{}: {e}", network.name)))?;
        }
        if self.fetch.max_rounds == 0 || self.fetch.concurrency == 0 {
            return Err(Error::Config(
                "fetch.max_rounds and fetch.concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Networks not marked deprecated
    pub fn active_networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter().filter(|n| !n.deprecated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "networks": [
            {
                "name": "optimism",
                "chain_id": 10,
                "native_asset": "ETH",
                "rpcs": ["https://mainnet.optimism.io", "https://optimism.publicnode.com"],
                "explorer": { "url": "https://api-optimistic.etherscan.io/api" }
            },
            {
                "name": "fantom",
                "chain_id": 250,
                "native_asset": "FTM",
                "deprecated": true
            }
        ],
        "addresses": { "hot": "0x00000000000000000000000000000000000000aa" }
    }"#;

    #[test]
    fn test_parse_defaults() {
        let config = Config::parse(CONFIG).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.fetch.max_rounds, 25);
        assert_eq!(config.addresses.len(), 1);
        assert_eq!(config.active_networks().count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::parse(CONFIG).unwrap();
        assert_eq!(Config::explorer_key_var("optimism"), "HODL_OPTIMISM_EXPLORER_KEY");

        config.apply_env(|name| (name == "HODL_OPTIMISM_EXPLORER_KEY").then(|| "secret".into()));
        assert_eq!(config.networks[0].explorer.as_ref().unwrap().key, "secret");
        assert!(config.networks[1].explorer.is_none());
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut config = Config::parse(CONFIG).unwrap();
        let copy = config.networks[0].clone();
        config.networks.push(copy);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_rpc_does_not_reject_config() {
        let mut config = Config::parse(CONFIG).unwrap();
        config.networks[0].rpcs.push("not a url".into());
        assert!(config.validate().is_ok());

        config.networks[0].explorer.as_mut().unwrap().url = "not a url".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/hodl.json"),
            Err(Error::Config(_))
        ));
    }
}
