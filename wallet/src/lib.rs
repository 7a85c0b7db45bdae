pub mod builder;
pub mod crypto;
pub mod error;
pub mod kernel;
pub mod negotiator;
pub mod node;
pub mod params;
pub mod storage;
pub mod types;
pub mod wallet;

pub use error::{TxFailure, TxFailureReason, WalletError};
pub use node::{NegotiatorGateway, NodeGateway};
pub use storage::{MemoryStore, WalletStore};
pub use wallet::Wallet;
