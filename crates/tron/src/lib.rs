pub mod address;
pub mod client;
pub mod events;
pub mod resources;
pub mod sender;

pub use address::TronAddress;
pub use client::ChainClient;
pub use sender::{FeePolicy, SignedTronTx, TronWallet};
