//! This prelude module simplifies importing the items needed to drive a run using a glob import.
//!
//! To use this prelude, add the following to your code:
//! ```
//! use hodl_evm::prelude::*;
//! ```

pub use crate::{
    connect_all, fetch_all, hashes_to_fetch, identify_all, Config, EvmClient, FetchSettings,
    TokenMetadataCache,
};

pub use alloy::primitives::{Address, B256, U256};
pub use hodl_provider::Network;
pub use hodl_store::FileDb;
