use crate::TronAddress;
use anyhow::{Context, Result, bail};
use k256::ecdsa::{SigningKey, signature::hazmat::PrehashSigner};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    /// Cap (sun) applied after headroom.
    pub fee_limit_cap_sun: u64,
    /// Extra headroom applied as parts-per-million.
    pub fee_limit_headroom_ppm: u64,
}

impl FeePolicy {
    pub fn apply(&self, base: u64) -> u64 {
        let headroom = base.saturating_mul(self.fee_limit_headroom_ppm.min(1_000_000)) / 1_000_000;
        base.saturating_add(headroom).min(self.fee_limit_cap_sun)
    }
}

#[derive(Debug, Clone)]
pub struct SignedTronTx {
    /// The node-provided transaction object with `signature` populated, ready to broadcast.
    pub tx: Value,
    pub txid: [u8; 32],
}

pub struct TronWallet {
    pub key: SigningKey,
    pub address: TronAddress,
}

impl TronWallet {
    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = TronAddress::from_verifying_key(key.verifying_key());
        Self { key, address }
    }

    /// Signs a node-built unsigned transaction object (as returned by `createtransaction` /
    /// `triggersmartcontract` / `freezebalancev2` / `delegateresource`).
    ///
    /// The node already computed `txID = sha256(raw_data)` and returns it alongside the raw
    /// transaction; we sign that digest directly rather than re-encoding `raw_data` ourselves,
    /// since the exact protobuf framing of `raw_data` is treated as opaque here.
    pub fn sign(&self, mut unsigned: Value) -> Result<SignedTronTx> {
        let txid_hex = unsigned
            .get("txID")
            .and_then(Value::as_str)
            .context("node response missing txID")?
            .to_string();
        let txid_bytes = hex::decode(&txid_hex).context("txID is not valid hex")?;
        let mut txid = [0u8; 32];
        if txid_bytes.len() != 32 {
            bail!("txID has {} bytes, want 32", txid_bytes.len());
        }
        txid.copy_from_slice(&txid_bytes);

        // Defense in depth: recompute the digest over raw_data_hex when the node provides it,
        // and refuse to sign if it disagrees with the advertised txID.
        if let Some(raw_hex) = unsigned.get("raw_data_hex").and_then(Value::as_str) {
            let raw_bytes = hex::decode(raw_hex).context("raw_data_hex is not valid hex")?;
            let recomputed = Sha256::digest(&raw_bytes);
            if recomputed.as_slice() != txid {
                bail!("txID does not match sha256(raw_data_hex); refusing to sign");
            }
        }

        let (rec_sig, recid) = self
            .key
            .sign_prehash_recoverable(&txid)
            .context("sign tron txid")?;
        let mut sig65 = rec_sig.to_bytes().to_vec();
        sig65.push(recid.to_byte() + 27);
        let sig_hex = hex::encode(sig65);

        let obj = unsigned
            .as_object_mut()
            .context("unsigned transaction is not a JSON object")?;
        obj.insert(
            "signature".to_string(),
            Value::Array(vec![Value::String(sig_hex)]),
        );

        Ok(SignedTronTx { tx: unsigned, txid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_wallet() -> TronWallet {
        let key = SigningKey::from_bytes(&[7u8; 32].into()).unwrap();
        TronWallet::from_signing_key(key)
    }

    #[test]
    fn signs_and_attaches_signature() {
        let wallet = test_wallet();
        let raw = b"pretend raw_data bytes";
        let txid = hex::encode(Sha256::digest(raw));
        let unsigned = json!({
            "raw_data_hex": hex::encode(raw),
            "txID": txid,
            "raw_data": { "contract": [] },
        });
        let signed = wallet.sign(unsigned).unwrap();
        let sig = signed.tx["signature"][0].as_str().unwrap();
        assert_eq!(hex::decode(sig).unwrap().len(), 65);
    }

    #[test]
    fn rejects_txid_mismatch() {
        let wallet = test_wallet();
        let unsigned = json!({
            "raw_data_hex": hex::encode(b"one thing"),
            "txID": hex::encode(Sha256::digest(b"another thing")),
        });
        assert!(wallet.sign(unsigned).is_err());
    }
}
