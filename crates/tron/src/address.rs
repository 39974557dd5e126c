use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};

/// Tron's address version byte (mainnet).
pub const ADDRESS_VERSION: u8 = 0x41;

/// Raw address length: version byte + 20-byte hash.
pub const TRON_ADDRESS_LEN: usize = 21;

/// 21 zero bytes. Used throughout the indexer as the "absent" sentinel: a contract-creation
/// output, a burn, or a missing from/to side never accumulates in the address index.
pub const ZERO_ADDRESS: [u8; TRON_ADDRESS_LEN] = [0u8; TRON_ADDRESS_LEN];

/// A decoded Tron address: version byte `0x41` plus a 20-byte hash.
///
/// This is the canonical internal key for all address-indexed state (see `store.rs`). Equality,
/// ordering and hashing all operate on the raw 21 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TronAddress([u8; TRON_ADDRESS_LEN]);

impl TronAddress {
    /// Builds an address from a raw 21-byte descriptor, without validating the version byte.
    pub const fn from_raw(bytes: [u8; TRON_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds an address from the version byte plus a 20-byte hash.
    pub fn from_hash(hash: [u8; 20]) -> Self {
        let mut raw = [0u8; TRON_ADDRESS_LEN];
        raw[0] = ADDRESS_VERSION;
        raw[1..].copy_from_slice(&hash);
        Self(raw)
    }

    /// Decodes a slice that should contain exactly 21 bytes (no version/checksum validation).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != TRON_ADDRESS_LEN {
            bail!(
                "invalid tron address descriptor length: {} (want {})",
                bytes.len(),
                TRON_ADDRESS_LEN
            );
        }
        let mut raw = [0u8; TRON_ADDRESS_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Rebuilds a Tron address from an EVM-style 20-byte hash, re-prefixing with `0x41`.
    ///
    /// Used to translate TRC-20 `Transfer` log topics (which carry Ethereum-padded 20-byte
    /// addresses) back into Tron address descriptors.
    pub fn from_evm(hash: [u8; 20]) -> Self {
        Self::from_hash(hash)
    }

    /// Parses a base58check-encoded address string back into its raw 21 bytes.
    pub fn from_base58check(s: &str) -> Result<Self> {
        let decoded = bs58::decode(s)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .context("base58check decode")?;
        Self::from_slice(&decoded)
    }

    /// Returns the raw 21-byte descriptor.
    pub fn prefixed_bytes(&self) -> [u8; TRON_ADDRESS_LEN] {
        self.0
    }

    /// Returns the 20-byte hash without the version byte.
    pub fn evm(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out.copy_from_slice(&self.0[1..]);
        out
    }

    /// Returns true if this is the zero-address sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    /// Encodes as base58check (the human-readable `T...` form).
    pub fn to_base58check(&self) -> String {
        bs58::encode(self.0).with_check().into_string()
    }

    /// Encodes as lowercase hex, `"41" + hex(hash)`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for TronAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base58check())
    }
}

/// Computes a base58check checksum independently of the `bs58` crate's `check` feature, for
/// tests that want to assert the checksum bytes directly.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_base58check() {
        let addr = TronAddress::from_hash([7u8; 20]);
        let encoded = addr.to_base58check();
        let decoded = TronAddress::from_base58check(&encoded).unwrap();
        assert_eq!(addr, decoded);
        assert_eq!(decoded.prefixed_bytes()[0], ADDRESS_VERSION);
    }

    #[test]
    fn rejects_bad_checksum() {
        let addr = TronAddress::from_hash([1u8; 20]);
        let mut encoded = addr.to_base58check().into_bytes();
        // flip the last character to corrupt the checksum
        let last = encoded.len() - 1;
        encoded[last] = if encoded[last] == b'1' { b'2' } else { b'1' };
        let s = String::from_utf8(encoded).unwrap();
        assert!(TronAddress::from_base58check(&s).is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(TronAddress::from_slice(&[0u8; 20]).is_err());
        assert!(TronAddress::from_slice(&[0u8; 22]).is_err());
    }

    #[test]
    fn zero_address_is_zero() {
        let z = TronAddress::from_raw(ZERO_ADDRESS);
        assert!(z.is_zero());
        assert!(!TronAddress::from_hash([1u8; 20]).is_zero());
    }

    #[test]
    fn evm_roundtrip() {
        let hash = [0xABu8; 20];
        let addr = TronAddress::from_evm(hash);
        assert_eq!(addr.evm(), hash);
        assert_eq!(addr.prefixed_bytes()[0], ADDRESS_VERSION);
    }

    #[test]
    fn checksum_matches_encoding() {
        let addr = TronAddress::from_hash([9u8; 20]);
        let expected = checksum(&addr.prefixed_bytes());
        let encoded = addr.to_base58check();
        let full = bs58::decode(&encoded).into_vec().unwrap();
        assert_eq!(&full[full.len() - 4..], expected);
    }
}
