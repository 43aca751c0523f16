//! ERC-20 call encoding and return decoding

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};

use crate::{Error, Result};

// The read-only subset of ERC-20 the resolver needs
sol! {
    interface IERC20 {
        function symbol() external view returns (string memory);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Calldata for `decimals()`
pub fn decimals_calldata() -> Bytes {
    IERC20::decimalsCall {}.abi_encode().into()
}

/// Calldata for `symbol()`
pub fn symbol_calldata() -> Bytes {
    IERC20::symbolCall {}.abi_encode().into()
}

/// Calldata for `balanceOf(owner)`
pub fn balance_of_calldata(owner: Address) -> Bytes {
    IERC20::balanceOfCall { account: owner }.abi_encode().into()
}

/// The last byte of a padded word; empty data decodes as zero
pub fn decode_uint8(data: &[u8]) -> u8 {
    data.last().copied().unwrap_or(0)
}

/// A big-endian integer of at most 32 bytes
pub fn decode_u256(data: &[u8]) -> Result<U256> {
    U256::try_from_be_slice(data)
        .ok_or_else(|| Error::Abi(format!("{} bytes do not fit a uint256", data.len())))
}

/// An ABI-encoded `string`
///
/// A few early tokens return `bytes32` instead; those are accepted as
/// NUL-padded UTF-8.
pub fn decode_string(data: &[u8]) -> Result<String> {
    match String::abi_decode(data) {
        Ok(value) => Ok(value),
        Err(e) if data.len() == 32 => {
            let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
            std::str::from_utf8(&data[..end])
                .map(str::to_string)
                .map_err(|_| Error::Abi(e.to_string()))
        }
        Err(e) => Err(Error::Abi(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, hex};

    #[test]
    fn test_selectors() {
        assert_eq!(decimals_calldata().to_string(), "0x313ce567");
        assert_eq!(symbol_calldata().to_string(), "0x95d89b41");

        let owner = address!("00000000000000000000000000000000000000aa");
        let calldata = balance_of_calldata(owner);
        assert_eq!(calldata.len(), 4 + 32);
        assert_eq!(&calldata[..4], &hex!("70a08231"));
    }

    #[test]
    fn test_decode_uint8() {
        let mut word = [0u8; 32];
        word[31] = 18;
        assert_eq!(decode_uint8(&word), 18);
        assert_eq!(decode_uint8(&[]), 0);
    }

    #[test]
    fn test_decode_string() {
        let encoded = String::from("USDC").abi_encode();
        assert_eq!(decode_string(&encoded).unwrap(), "USDC");

        let mut legacy = [0u8; 32];
        legacy[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_string(&legacy).unwrap(), "MKR");

        assert!(decode_string(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_decode_u256() {
        assert_eq!(decode_u256(&[0x01, 0x00]).unwrap(), U256::from(256));
        assert_eq!(decode_u256(&[]).unwrap(), U256::ZERO);
        assert!(decode_u256(&[0u8; 33]).is_err());
    }
}
