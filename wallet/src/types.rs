use serde::{Deserialize, Serialize};

use crate::crypto::Point;
use crate::error::TxFailureReason;

pub type Amount = u64;
pub type Height = u64;
pub type Timestamp = u64;

pub const MAX_HEIGHT: Height = u64::MAX;
/// Session id of a coin that is not locked by any transaction.
pub const EMPTY_COIN_SESSION: u64 = 0;
/// Blocks a freshly proved output must wait before it can be spent.
pub const MATURITY_STD: Height = 60;

pub type TxId = [u8; 16];

pub fn generate_tx_id() -> TxId {
    *uuid::Uuid::new_v4().as_bytes()
}

pub fn timestamp_now() -> Timestamp {
    chrono::Utc::now().timestamp().max(0) as Timestamp
}

/// Public identity of a wallet endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletId(pub Point);

impl std::fmt::Display for WalletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0.to_bytes()[..8]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Regular,
    Coinbase,
    Fee,
    Change,
    Kernel,
}

/// Coin lifecycle. `ChangeV0` survives only so old blobs still decode;
/// stores migrate it to `Incoming` on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinStatus {
    Unavailable,
    Available,
    Maturing,
    Outgoing,
    Incoming,
    ChangeV0,
    Spent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoinId {
    /// Key index, unique per wallet; assigned on store.
    pub idx: u64,
    /// Child-KDF sub index.
    pub sub_idx: u32,
    pub value: Amount,
    pub key_type: KeyType,
}

/// An owned UTXO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub id: CoinId,
    pub status: CoinStatus,
    pub create_height: Height,
    pub maturity: Height,
    pub confirm_height: Height,
    pub locked_height: Height,
    pub create_tx_id: Option<TxId>,
    pub spent_tx_id: Option<TxId>,
    pub session_id: u64,
}

impl Coin {
    pub fn new(value: Amount, status: CoinStatus, key_type: KeyType) -> Coin {
        Coin {
            id: CoinId {
                idx: 0,
                sub_idx: 0,
                value,
                key_type,
            },
            status,
            create_height: 0,
            maturity: MAX_HEIGHT,
            confirm_height: MAX_HEIGHT,
            locked_height: MAX_HEIGHT,
            create_tx_id: None,
            spent_tx_id: None,
            session_id: EMPTY_COIN_SESSION,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self.id.key_type, KeyType::Coinbase | KeyType::Fee)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAddress {
    pub wallet_id: WalletId,
    pub label: String,
    pub category: String,
    pub create_time: Timestamp,
    /// Zero means the address never expires.
    pub duration: u64,
    /// Non-zero when the private key of this address is held locally.
    pub own_id: u64,
}

impl WalletAddress {
    pub fn expiration_time(&self) -> Timestamp {
        if self.duration == 0 {
            return Timestamp::MAX;
        }
        self.create_time.saturating_add(self.duration)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expiration_time()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    InProgress,
    Cancelled,
    Completed,
    Failed,
    Registered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxDescription {
    pub tx_id: TxId,
    pub amount: Amount,
    pub fee: Amount,
    pub change: Amount,
    pub min_height: Height,
    pub max_height: Height,
    pub peer_id: WalletId,
    pub my_id: WalletId,
    pub create_time: Timestamp,
    pub modify_time: Timestamp,
    pub sender: bool,
    pub status: TxStatus,
    pub failure_reason: Option<TxFailureReason>,
    pub kernel_id: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Added,
    Removed,
    Updated,
    Reset,
}

/// Block identity as seen by the wallet: the chain tip or the block a
/// kernel was proved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStateId {
    pub height: Height,
    pub hash: [u8; 32],
}

/// Tagged observer callbacks fanned out by the wallet store.
/// Subscriptions are held as weak references, so a subscription lives
/// exactly as long as the observer itself.
pub trait WalletObserver: Send + Sync {
    fn on_coins_changed(&self) {}
    fn on_transaction_changed(&self, _action: ChangeAction, _items: &[TxDescription]) {}
    fn on_system_state_changed(&self) {}
    fn on_address_changed(&self) {}
}
