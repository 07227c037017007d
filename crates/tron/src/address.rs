use anyhow::{Context, Result, bail};
use k256::ecdsa::VerifyingKey;
use sha3::{Digest, Keccak256};

/// A Tron base58check address, kept alongside its raw 21-byte form (`0x41` + 20 address bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress {
    bytes: [u8; 21],
}

impl TronAddress {
    pub const PREFIX: u8 = 0x41;

    pub fn from_prefixed_bytes(bytes: [u8; 21]) -> Result<Self> {
        if bytes[0] != Self::PREFIX {
            bail!("tron address must start with 0x41, got 0x{:02x}", bytes[0]);
        }
        Ok(Self { bytes })
    }

    /// Derives the address from a secp256k1 public key the way Tron does: keccak256 of the
    /// uncompressed point (sans the 0x04 tag), last 20 bytes, prefixed with 0x41.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = Keccak256::digest(&point.as_bytes()[1..]);
        let mut bytes = [0u8; 21];
        bytes[0] = Self::PREFIX;
        bytes[1..].copy_from_slice(&hash[12..]);
        Self { bytes }
    }

    pub fn from_base58check(s: &str) -> Result<Self> {
        let raw = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .with_context(|| format!("invalid base58check tron address: {s}"))?;
        let arr: [u8; 21] = raw
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("tron address has {} bytes, want 21", v.len()))?;
        Self::from_prefixed_bytes(arr)
    }

    pub fn from_hex41(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).context("invalid hex tron address")?;
        let arr: [u8; 21] = raw
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("tron address has {} bytes, want 21", v.len()))?;
        Self::from_prefixed_bytes(arr)
    }

    pub fn prefixed_bytes(&self) -> [u8; 21] {
        self.bytes
    }

    pub fn to_hex41(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn to_base58check(&self) -> String {
        bs58::encode(self.bytes).with_check().into_string()
    }
}

impl std::fmt::Display for TronAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58check())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_hex_roundtrip() {
        let hex = "4154238dd381e08f6f5204a2b7847e5e19ac4cd5a8";
        let addr = TronAddress::from_hex41(hex).unwrap();
        let b58 = addr.to_base58check();
        let back = TronAddress::from_base58check(&b58).unwrap();
        assert_eq!(back.to_hex41(), hex);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let mut bytes = [0u8; 21];
        bytes[0] = 0x00;
        assert!(TronAddress::from_prefixed_bytes(bytes).is_err());
    }
}
