use std::sync::Arc;

use crate::error::Result;
use crate::kernel::{Transaction, TxKernel};
use crate::negotiator::Negotiator;
use crate::node::{NegotiatorGateway, NodeGateway};
use crate::params::{self, SetTxParameter, TxParameterId, TxType};
use crate::storage::WalletStore;
use crate::types::{
    generate_tx_id, timestamp_now, Amount, BlockStateId, Height, TxDescription, TxId, TxStatus,
    WalletId, MAX_HEIGHT,
};

/// Default validity window of a new transaction, in blocks.
pub const TX_LIFETIME: Height = 120;

/// Owns the store and node access and routes every trigger (user
/// actions, peer messages, node callbacks) into per-transaction
/// negotiators. Negotiators keep all of their state in the store, so the
/// wallet is restart-safe: [`Wallet::resume_all`] re-drives whatever was
/// in flight.
pub struct Wallet {
    store: Arc<dyn WalletStore>,
    node: Arc<dyn NodeGateway>,
}

impl Wallet {
    pub fn new(store: Arc<dyn WalletStore>, node: Arc<dyn NodeGateway>) -> Wallet {
        Wallet { store, node }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    /// Start an outgoing transaction and run its first negotiation step.
    pub fn transfer_money(
        &self,
        my_id: WalletId,
        peer_id: WalletId,
        amount: Amount,
        fee: Amount,
        lifetime: Height,
    ) -> Result<TxId> {
        let tx_id = generate_tx_id();
        let height = self.store.current_height();
        let max_height = height.saturating_add(lifetime);
        let create_time = timestamp_now();

        self.store.save_tx(&TxDescription {
            tx_id,
            amount,
            fee,
            change: 0,
            min_height: height,
            max_height,
            peer_id,
            my_id,
            create_time,
            modify_time: create_time,
            sender: true,
            status: TxStatus::Pending,
            failure_reason: None,
            kernel_id: None,
        });

        let store = self.store.as_ref();
        params::set_tx_parameter(store, &tx_id, TxParameterId::TransactionType, &TxType::Simple, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::CreateTime, &create_time, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::Amount, &amount, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::Fee, &fee, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::MinHeight, &height, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::MaxHeight, &max_height, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::PeerId, &peer_id, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::MyId, &my_id, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::IsSender, &true, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::IsInitiator, &true, false)?;
        params::set_tx_parameter(store, &tx_id, TxParameterId::Status, &TxStatus::Pending, false)?;

        tracing::info!("[{}] sending {} (fee: {})", hex::encode(tx_id), amount, fee);
        self.update_tx(tx_id);
        Ok(tx_id)
    }

    pub fn cancel_tx(&self, tx_id: &TxId) {
        Negotiator::new(self.store.as_ref(), self, *tx_id).cancel();
    }

    /// Parameter message from a peer. Unknown transactions are opened
    /// only by a complete invitation; private parameter ids never cross
    /// the trust boundary.
    pub fn on_tx_parameters(&self, my_id: WalletId, msg: SetTxParameter) {
        if msg.tx_type != TxType::Simple {
            tracing::warn!("ignoring message of unsupported tx type {:?}", msg.tx_type);
            return;
        }

        let known = self.store.get_tx(&msg.tx_id).is_some();
        if !known {
            let (Some(amount), Some(fee), Some(is_sender)) = (
                msg.get::<Amount>(TxParameterId::Amount),
                msg.get::<Amount>(TxParameterId::Fee),
                msg.get::<bool>(TxParameterId::IsSender),
            ) else {
                tracing::debug!(
                    "[{}] ignoring message for unknown transaction",
                    hex::encode(msg.tx_id)
                );
                return;
            };

            let height = self.store.current_height();
            let create_time = timestamp_now();
            self.store.save_tx(&TxDescription {
                tx_id: msg.tx_id,
                amount,
                fee,
                change: 0,
                min_height: msg.get(TxParameterId::MinHeight).unwrap_or(height),
                max_height: msg.get(TxParameterId::MaxHeight).unwrap_or(MAX_HEIGHT),
                peer_id: msg.from,
                my_id,
                create_time,
                modify_time: create_time,
                sender: is_sender,
                status: TxStatus::Pending,
                failure_reason: None,
                kernel_id: None,
            });

            let store = self.store.as_ref();
            let _ = params::set_tx_parameter(
                store,
                &msg.tx_id,
                TxParameterId::TransactionType,
                &TxType::Simple,
                false,
            );
            let _ = params::set_tx_parameter(
                store,
                &msg.tx_id,
                TxParameterId::CreateTime,
                &create_time,
                false,
            );
            let _ =
                params::set_tx_parameter(store, &msg.tx_id, TxParameterId::MyId, &my_id, false);
            let _ =
                params::set_tx_parameter(store, &msg.tx_id, TxParameterId::PeerId, &msg.from, false);
            let _ = params::set_tx_parameter(
                store,
                &msg.tx_id,
                TxParameterId::IsInitiator,
                &false,
                false,
            );
            let _ = params::set_tx_parameter(
                store,
                &msg.tx_id,
                TxParameterId::Status,
                &TxStatus::Pending,
                false,
            );
        }

        let mut changed = !known;
        for (id, blob) in &msg.params {
            if !id.is_public() {
                tracing::warn!("ignoring private parameter {:?} from peer", id);
                continue;
            }
            changed |= self.store.set_tx_parameter_raw(
                &msg.tx_id,
                *id,
                blob.clone(),
                id.is_observable(),
            );
        }
        if changed {
            self.update_tx(msg.tx_id);
        }
    }

    /// Node acknowledged (or refused) the submitted transaction.
    pub fn on_tx_registered(&self, tx_id: TxId, success: bool) {
        let _ = params::set_tx_parameter(
            self.store.as_ref(),
            &tx_id,
            TxParameterId::TransactionRegistered,
            &success,
            false,
        );
        self.update_tx(tx_id);
    }

    /// Kernel inclusion proof arrived at `height`.
    pub fn on_kernel_proof(&self, tx_id: TxId, height: Height) {
        let _ = params::set_tx_parameter(
            self.store.as_ref(),
            &tx_id,
            TxParameterId::KernelProofHeight,
            &height,
            false,
        );
        self.update_tx(tx_id);
    }

    /// New chain tip: record it and poll every active transaction, which
    /// is also how expiry is detected.
    pub fn on_tip_changed(&self) {
        if let Some(tip) = self.node.get_tip() {
            self.store.set_system_state_id(&tip);
        }
        for tx in self.active_transactions() {
            self.update_tx(tx.tx_id);
        }
    }

    /// Node connectivity changed. A fresh connection re-drives every
    /// active transaction, since triggers may have been missed offline.
    pub fn on_node_connected(&self, connected: bool) {
        tracing::info!(
            "node {}",
            if connected { "connected" } else { "disconnected" }
        );
        if connected {
            for tx in self.active_transactions() {
                self.update_tx(tx.tx_id);
            }
        }
    }

    pub fn on_connection_failed(&self, reason: &str) {
        tracing::warn!("node connection failed: {}", reason);
    }

    /// Restart recovery: every unfinished transaction gets one update.
    pub fn resume_all(&self) {
        for tx in self.active_transactions() {
            tracing::info!("[{}] resuming", hex::encode(tx.tx_id));
            self.update_tx(tx.tx_id);
        }
    }

    fn active_transactions(&self) -> Vec<TxDescription> {
        self.store
            .tx_history()
            .into_iter()
            .filter(|tx| {
                matches!(
                    tx.status,
                    TxStatus::Pending | TxStatus::InProgress | TxStatus::Registered
                )
            })
            .collect()
    }

    /// Terminal transactions stay terminal: a late peer message or node
    /// callback must not re-drive a rolled-back negotiation.
    fn update_tx(&self, tx_id: TxId) {
        match self.store.get_tx(&tx_id) {
            Some(desc)
                if matches!(
                    desc.status,
                    TxStatus::Pending | TxStatus::InProgress | TxStatus::Registered
                ) =>
            {
                Negotiator::new(self.store.as_ref(), self, tx_id).update();
            }
            Some(desc) => {
                tracing::debug!(
                    "[{}] ignoring update in terminal status {:?}",
                    hex::encode(tx_id),
                    desc.status
                );
            }
            None => {
                tracing::debug!("[{}] no such transaction", hex::encode(tx_id));
            }
        }
    }
}

impl NegotiatorGateway for Wallet {
    fn send_tx_params(&self, peer: WalletId, msg: SetTxParameter) {
        self.node.send_tx_params(peer, msg);
    }

    fn register_tx(&self, tx_id: &TxId, tx: Transaction) {
        self.node.register_tx(*tx_id, tx);
    }

    fn confirm_kernel(&self, tx_id: &TxId, kernel: &TxKernel) {
        self.node.confirm_kernel(*tx_id, kernel.clone());
    }

    fn get_tip(&self) -> Option<BlockStateId> {
        self.node.get_tip()
    }

    fn on_tx_completed(&self, tx_id: &TxId) {
        tracing::debug!("[{}] negotiation finished", hex::encode(tx_id));
    }
}
