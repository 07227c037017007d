use thiserror::Error;

/// Error taxonomy for the gateway's core. Callers match on these kinds where the propagation
/// policy differs (skip-and-continue vs. fail-the-block vs. fatal); everything else is carried
/// as plain `anyhow::Error` context.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unrecognized transaction type")]
    UnknownTransactionType,

    #[error("transaction reverted on chain")]
    BadContractResult,

    #[error("transfer log data too short")]
    InsufficientDataBytes,

    #[error("transfer log has non-zero padding")]
    NonEmptyPaddingBytes,

    #[error("contract address is not a configured token")]
    UnknownToken,

    #[error("keeper rejected notification: {0}")]
    NotificationFailed(String),

    #[error("connection manager has no elected server yet")]
    NoServerSet,

    #[error("all configured full nodes are unreachable")]
    AllServersOffline,

    #[error("wallet encryption mode does not match stored key format")]
    EncryptionModeMismatch,

    #[error("validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
