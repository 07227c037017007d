use crate::TronAddress;
use anyhow::{Context, Result, bail};

/// keccak256("Transfer(address,address,uint256)").
pub const TRANSFER_EVENT_TOPIC0: &str =
    "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3e";

/// A decoded TRC-20 `Transfer` event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trc20Transfer {
    pub from: TronAddress,
    pub to: TronAddress,
    /// Raw token units (not yet scaled by decimals).
    pub amount: u128,
}

/// A log matched the `Transfer` event shape (3 topics, `Transfer` topic0) but its data payload was
/// malformed. Downcastable so callers can distinguish this from "this log isn't a transfer at all".
#[derive(Debug, thiserror::Error)]
#[error("transfer log data too short")]
pub struct InsufficientDataBytes;

#[derive(Debug, thiserror::Error)]
#[error("transfer log has non-zero padding")]
pub struct NonEmptyPaddingBytes;

fn topic_address(topic_hex: &str) -> Result<TronAddress> {
    let bytes = hex::decode(topic_hex).context("log topic is not hex")?;
    if bytes.len() != 32 {
        bail!("log topic has {} bytes, want 32", bytes.len());
    }
    if bytes[0..11] != [0u8; 11] || bytes[11] != 0 {
        // padding before the 20-byte address must be zero
        bail!("log topic has non-zero padding before address");
    }
    let mut prefixed = [0u8; 21];
    prefixed[0] = TronAddress::PREFIX;
    prefixed[1..].copy_from_slice(&bytes[12..]);
    TronAddress::from_prefixed_bytes(prefixed)
}

/// Decodes one log entry as a TRC-20 `Transfer(address,address,uint256)` event.
///
/// `topics[0]` must match [`TRANSFER_EVENT_TOPIC0`], `topics[1]`/`topics[2]` hold the
/// zero-padded `from`/`to` addresses, and `data` holds the big-endian uint256 amount.
pub fn decode_transfer_log(topics: &[String], data_hex: &str) -> Result<Trc20Transfer> {
    if topics.len() < 3 {
        bail!("transfer log needs 3 topics, got {}", topics.len());
    }
    let topic0 = topics[0].trim_start_matches("0x").to_lowercase();
    if topic0 != TRANSFER_EVENT_TOPIC0 {
        bail!("log topic0 is not the Transfer event");
    }

    let from = topic_address(&topics[1])?;
    let to = topic_address(&topics[2])?;

    let data = hex::decode(data_hex.trim_start_matches("0x")).context("log data is not hex")?;
    if data.len() < 32 {
        return Err(InsufficientDataBytes.into());
    }
    if data.len() > 32 && data[..data.len() - 32].iter().any(|b| *b != 0) {
        return Err(NonEmptyPaddingBytes.into());
    }
    let amount_bytes = &data[data.len() - 32..];
    let amount = u128::from_be_bytes(amount_bytes[16..32].try_into().unwrap());
    if amount_bytes[..16].iter().any(|b| *b != 0) {
        return Err(NonEmptyPaddingBytes.into());
    }

    Ok(Trc20Transfer { from, to, amount })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_topic(addr: &TronAddress) -> String {
        let mut out = vec![0u8; 12];
        out.extend_from_slice(&addr.prefixed_bytes()[1..]);
        hex::encode(out)
    }

    #[test]
    fn decodes_well_formed_transfer() {
        let from = TronAddress::from_hex41("4100000000000000000000000000000000000001").unwrap();
        let to = TronAddress::from_hex41("4100000000000000000000000000000000000002").unwrap();
        let topics = vec![
            TRANSFER_EVENT_TOPIC0.to_string(),
            padded_topic(&from),
            padded_topic(&to),
        ];
        let mut data = [0u8; 32];
        data[31] = 42;
        let decoded = decode_transfer_log(&topics, &hex::encode(data)).unwrap();
        assert_eq!(decoded.from, from);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.amount, 42);
    }

    #[test]
    fn rejects_short_data() {
        let from = TronAddress::from_hex41("4100000000000000000000000000000000000001").unwrap();
        let to = TronAddress::from_hex41("4100000000000000000000000000000000000002").unwrap();
        let topics = vec![
            TRANSFER_EVENT_TOPIC0.to_string(),
            padded_topic(&from),
            padded_topic(&to),
        ];
        assert!(decode_transfer_log(&topics, "0011").is_err());
    }

    #[test]
    fn rejects_wrong_topic0() {
        let topics = vec!["00".repeat(32), "00".repeat(32), "00".repeat(32)];
        assert!(decode_transfer_log(&topics, &"00".repeat(32)).is_err());
    }
}
