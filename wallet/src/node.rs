use crate::kernel::{Transaction, TxKernel};
use crate::params::SetTxParameter;
use crate::types::{BlockStateId, TxId, WalletId};

/// Block-chain node client consumed by the wallet. Calls are
/// fire-and-forget; results come back through the wallet's
/// `on_tx_registered` / `on_kernel_proof` / `on_tip_changed` entry
/// points.
pub trait NodeGateway: Send + Sync {
    /// Deliver a parameter message to the peer wallet.
    fn send_tx_params(&self, peer: WalletId, msg: SetTxParameter);
    /// Submit an assembled transaction to the chain.
    fn register_tx(&self, tx_id: TxId, tx: Transaction);
    /// Ask for an inclusion proof of the kernel.
    fn confirm_kernel(&self, tx_id: TxId, kernel: TxKernel);
    /// Most recent chain tip, if connected.
    fn get_tip(&self) -> Option<BlockStateId>;
}

/// What a negotiator needs from its surroundings: node access plus the
/// completion callback. The wallet implements this by delegating chain
/// operations to its [`NodeGateway`].
pub trait NegotiatorGateway: Send + Sync {
    fn send_tx_params(&self, peer: WalletId, msg: SetTxParameter);
    fn register_tx(&self, tx_id: &TxId, tx: Transaction);
    fn confirm_kernel(&self, tx_id: &TxId, kernel: &TxKernel);
    fn get_tip(&self) -> Option<BlockStateId>;
    fn on_tx_completed(&self, tx_id: &TxId);
}
