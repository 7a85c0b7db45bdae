use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::builder::TxBuilder;
use crate::crypto::{PaymentConfirmation, Signature};
use crate::error::{TxFailure, TxFailureReason, UpdateError, WalletError};
use crate::node::NegotiatorGateway;
use crate::params::{self, SetTxParameter, TxParameterId};
use crate::storage::WalletStore;
use crate::types::{
    Amount, Coin, CoinStatus, Height, TxId, TxStatus, WalletId, MATURITY_STD, MAX_HEIGHT,
};

pub const PROTO_VERSION: u32 = 1;

/// Negotiation round the transaction is currently in. Persisted in the
/// parameter bag so the machine survives restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Initial,
    Invitation,
    PeerConfirmation,
    InvitationConfirmation,
    KernelConfirmation,
    Registration,
}

/// Drives one transaction through the multi-round negotiation protocol.
/// The negotiator itself is stateless: everything lives in the store, so
/// instances are cheap throwaways constructed per trigger. Each
/// `update()` is idempotent and performs at most one externally visible
/// step.
pub struct Negotiator<'w> {
    store: &'w dyn WalletStore,
    gateway: &'w dyn NegotiatorGateway,
    tx_id: TxId,
}

impl<'w> Negotiator<'w> {
    pub fn new(
        store: &'w dyn WalletStore,
        gateway: &'w dyn NegotiatorGateway,
        tx_id: TxId,
    ) -> Negotiator<'w> {
        Negotiator {
            store,
            gateway,
            tx_id,
        }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_id
    }

    pub fn tx_id_str(&self) -> String {
        hex::encode(self.tx_id)
    }

    pub fn store(&self) -> &'w dyn WalletStore {
        self.store
    }

    pub fn get_parameter<T: DeserializeOwned>(&self, id: TxParameterId) -> Option<T> {
        params::get_tx_parameter(self.store, &self.tx_id, id)
    }

    pub fn get_mandatory<T: DeserializeOwned>(&self, id: TxParameterId) -> Result<T, WalletError> {
        self.get_parameter(id)
            .ok_or(WalletError::MissingParameter(id))
    }

    pub fn set_parameter<T: Serialize>(
        &self,
        id: TxParameterId,
        value: &T,
        notify: bool,
    ) -> Result<bool, WalletError> {
        params::set_tx_parameter(self.store, &self.tx_id, id, value, notify)
    }

    pub fn is_initiator(&self) -> Result<bool, WalletError> {
        self.get_mandatory(TxParameterId::IsInitiator)
    }

    fn peer_version(&self) -> u32 {
        self.get_parameter(TxParameterId::PeerProtoVersion)
            .unwrap_or(0)
    }

    fn state(&self) -> TxState {
        self.get_parameter(TxParameterId::State)
            .unwrap_or(TxState::Initial)
    }

    fn set_state(&self, state: TxState) -> Result<(), UpdateError> {
        self.set_parameter(TxParameterId::State, &state, false)?;
        Ok(())
    }

    /// Run one negotiation step. Failures classified as terminal route
    /// through the rollback path; anything else is logged and the
    /// transaction retries on its next trigger.
    pub fn update(&self) {
        let result = self.check_external_failures().and_then(|handled| {
            if handled {
                return Ok(());
            }
            self.update_impl()?;
            self.check_expired()
        });
        match result {
            Ok(()) => {}
            Err(UpdateError::Failure(failure)) => {
                tracing::error!("[{}] {}", self.tx_id_str(), failure.reason);
                self.on_failed(failure.reason, failure.notify);
            }
            Err(UpdateError::Internal(e)) => {
                tracing::error!("[{}] update error: {}", self.tx_id_str(), e);
            }
        }
    }

    /// Cancel at any state. A transaction that never started is simply
    /// deleted; anything further along is failed, rolled back and the
    /// peer is told.
    pub fn cancel(&self) {
        let status = self
            .get_parameter(TxParameterId::Status)
            .unwrap_or(TxStatus::Failed);
        if status == TxStatus::Pending {
            self.store.delete_tx(&self.tx_id);
        } else {
            self.notify_failure(TxFailureReason::Cancelled);
            self.update_tx_description(TxStatus::Cancelled);
            self.rollback();
            self.gateway.on_tx_completed(&self.tx_id);
        }
    }

    /// A peer may inject `FailureReason`; it is honored only while the
    /// transaction is in progress, and never echoed back.
    fn check_external_failures(&self) -> Result<bool, UpdateError> {
        if let Some(reason) = self.get_parameter::<TxFailureReason>(TxParameterId::FailureReason) {
            let status: TxStatus = self.get_mandatory(TxParameterId::Status)?;
            if status == TxStatus::InProgress {
                return Err(TxFailure::new(reason, false).into());
            }
        }
        Ok(false)
    }

    fn check_expired(&self) -> Result<(), UpdateError> {
        let status: TxStatus = self.get_mandatory(TxParameterId::Status)?;
        if status == TxStatus::Completed {
            return Ok(());
        }
        let max_height: Height = self
            .get_parameter(TxParameterId::MaxHeight)
            .unwrap_or(MAX_HEIGHT);
        if let Some(tip) = self.gateway.get_tip() {
            if tip.height > max_height {
                tracing::info!(
                    "[{}] transaction expired, tip {} > max kernel height {}",
                    self.tx_id_str(),
                    tip.height,
                    max_height
                );
                return Err(TxFailure::new(TxFailureReason::TransactionExpired, true).into());
            }
        }
        Ok(())
    }

    fn update_impl(&self) -> Result<(), UpdateError> {
        let is_sender: bool = self.get_mandatory(TxParameterId::IsSender)?;
        let is_self_tx = self.is_self_tx()?;
        let tx_state = self.state();

        let amount_list: Vec<Amount> = match self.get_parameter(TxParameterId::AmountList) {
            Some(list) => list,
            None => vec![self.get_mandatory(TxParameterId::Amount)?],
        };
        let fee: Amount = self.get_mandatory(TxParameterId::Fee)?;

        let mut builder = TxBuilder::new(self, amount_list, fee);
        if !builder.load_initial_params() && tx_state == TxState::Initial {
            tracing::info!(
                "[{}] {} {} (fee: {})",
                self.tx_id_str(),
                if is_sender { "sending" } else { "receiving" },
                builder.amount(),
                builder.fee()
            );

            if is_sender {
                builder.select_inputs()?;
                builder.add_change_output()?;
            }
            if is_self_tx || !is_sender {
                for amount in builder.amount_list().to_vec() {
                    builder.add_output(amount, false)?;
                }
            }
            builder.finalize_outputs()?;
            self.update_tx_description(TxStatus::InProgress);
        }

        if self
            .get_parameter::<u64>(TxParameterId::MyAddressId)
            .is_none()
        {
            if let Some(my_id) = self.get_parameter::<WalletId>(TxParameterId::MyId) {
                if let Some(address) = self.store.get_address(&my_id) {
                    if address.own_id != 0 {
                        self.set_parameter(TxParameterId::MyAddressId, &address.own_id, false)?;
                    }
                }
            }
        }

        builder.create_kernel()?;

        if !is_self_tx && !builder.load_peer_public_excess_and_nonce() {
            // nothing from the peer yet; only the initiator can be here
            if tx_state == TxState::Initial {
                self.send_invitation(&builder, is_sender)?;
                self.set_state(TxState::Invitation)?;
            }
            return Ok(());
        }

        builder.sign_partial()?;

        let has_peer_io = builder.load_peer_inputs_and_outputs();
        if !is_self_tx && !builder.load_peer_signature() {
            if tx_state == TxState::Initial {
                // invited participant answering the invitation
                self.update_tx_description(TxStatus::Registered);
                self.confirm_invitation(&builder, !has_peer_io)?;

                if self
                    .get_parameter::<u32>(TxParameterId::PeerProtoVersion)
                    .is_some()
                {
                    // current-protocol peers register the transaction
                    // themselves; go straight to awaiting the proof
                    self.set_parameter(TxParameterId::TransactionRegistered, &true, false)?;
                    self.set_state(TxState::KernelConfirmation)?;
                    self.confirm_kernel(&builder)?;
                } else {
                    self.set_state(TxState::InvitationConfirmation)?;
                }
                return Ok(());
            }
            if self.is_initiator()? {
                return Ok(());
            }
        }

        if self.is_initiator()? && !builder.is_peer_signature_valid() {
            return Err(TxFailure::new(TxFailureReason::InvalidPeerSignature, true).into());
        }

        if !is_self_tx && is_sender && self.is_initiator()? {
            self.verify_payment_confirmation()?;
        }

        builder.finalize_signature()?;

        let registered: Option<bool> = self.get_parameter(TxParameterId::TransactionRegistered);
        match registered {
            None => {
                if !is_self_tx && (!has_peer_io || self.is_initiator()?) {
                    if tx_state == TxState::Invitation {
                        self.update_tx_description(TxStatus::Registered);
                        self.confirm_transaction(&builder, !has_peer_io)?;
                        self.set_state(TxState::PeerConfirmation)?;
                    }
                    if !has_peer_io {
                        return Ok(());
                    }
                }

                let transaction = builder.create_transaction()?;
                if !transaction.is_valid() {
                    return Err(TxFailure::new(TxFailureReason::InvalidTransaction, true).into());
                }
                self.gateway.register_tx(&self.tx_id, transaction);
                self.set_state(TxState::Registration)?;
                return Ok(());
            }
            Some(false) => {
                return Err(TxFailure::new(TxFailureReason::FailedToRegister, true).into());
            }
            Some(true) => {}
        }

        let proof_height: Height = self
            .get_parameter(TxParameterId::KernelProofHeight)
            .unwrap_or(0);
        if proof_height == 0 {
            if self.state() == TxState::Registration
                && self
                    .get_parameter::<u32>(TxParameterId::PeerProtoVersion)
                    .is_none()
            {
                // legacy peers need to be told explicitly
                self.notify_transaction_registered()?;
            }
            self.set_state(TxState::KernelConfirmation)?;
            self.confirm_kernel(&builder)?;
            return Ok(());
        }

        // proof arrived: settle the coins created and spent by this tx
        let mut unconfirmed = self.unconfirmed_outputs();
        for coin in &mut unconfirmed {
            if coin.status == CoinStatus::Outgoing {
                coin.status = CoinStatus::Spent;
            } else {
                coin.status = CoinStatus::Available;
                coin.confirm_height = proof_height;
                coin.maturity = proof_height + MATURITY_STD;
            }
        }
        self.store.save_coins(&unconfirmed);

        self.complete_tx();
        Ok(())
    }

    fn verify_payment_confirmation(&self) -> Result<(), UpdateError> {
        let verified = (|| {
            let peer_id: WalletId = self.get_parameter(TxParameterId::PeerId)?;
            let my_id: WalletId = self.get_parameter(TxParameterId::MyId)?;
            let kernel_id: [u8; 32] = self.get_parameter(TxParameterId::KernelId)?;
            let value: Amount = self.get_parameter(TxParameterId::Amount)?;
            let signature: Signature = self.get_parameter(TxParameterId::PaymentConfirmation)?;

            let confirmation = PaymentConfirmation {
                kernel_id,
                value,
                sender: my_id.0,
            };
            Some(confirmation.is_valid(&peer_id.0, &signature))
        })()
        .unwrap_or(false);

        if !verified && self.peer_version() >= PROTO_VERSION {
            return Err(TxFailure::new(TxFailureReason::NoPaymentProof, false).into());
        }
        Ok(())
    }

    fn send_invitation(&self, builder: &TxBuilder, is_sender: bool) -> Result<(), UpdateError> {
        let msg = SetTxParameter::new(self.tx_id, self.my_id()?)
            .add(TxParameterId::Amount, &builder.amount())
            .and_then(|m| m.add(TxParameterId::Fee, &builder.fee()))
            .and_then(|m| m.add(TxParameterId::MinHeight, &builder.min_height()))
            .and_then(|m| m.add(TxParameterId::MaxHeight, &builder.max_height()))
            .and_then(|m| m.add(TxParameterId::IsSender, &!is_sender))
            .and_then(|m| m.add(TxParameterId::PeerProtoVersion, &PROTO_VERSION))
            .and_then(|m| m.add(TxParameterId::PeerPublicExcess, &builder.public_excess()))
            .and_then(|m| m.add(TxParameterId::PeerPublicNonce, &builder.public_nonce()))
            .map_err(WalletError::from)?;

        if !self.send_tx_parameters(msg) {
            return Err(TxFailure::new(TxFailureReason::FailedToSendParameters, false).into());
        }
        Ok(())
    }

    fn confirm_invitation(&self, builder: &TxBuilder, send_utxos: bool) -> Result<(), UpdateError> {
        tracing::info!(
            "[{}] transaction accepted, kernel: {}",
            self.tx_id_str(),
            hex::encode(builder.kernel().map_err(WalletError::from)?.id())
        );
        let mut msg = SetTxParameter::new(self.tx_id, self.my_id()?)
            .add(TxParameterId::PeerProtoVersion, &PROTO_VERSION)
            .and_then(|m| m.add(TxParameterId::PeerPublicExcess, &builder.public_excess()))
            .and_then(|m| m.add(TxParameterId::PeerSignature, &builder.partial_signature()))
            .and_then(|m| m.add(TxParameterId::PeerPublicNonce, &builder.public_nonce()))
            .map_err(WalletError::from)?;
        if send_utxos {
            msg = msg
                .add(TxParameterId::PeerInputs, &builder.inputs().to_vec())
                .and_then(|m| m.add(TxParameterId::PeerOutputs, &builder.outputs().to_vec()))
                .and_then(|m| m.add(TxParameterId::PeerOffset, &builder.offset()))
                .map_err(WalletError::from)?;
        }

        let is_sender: bool = self.get_mandatory(TxParameterId::IsSender)?;
        if !is_sender {
            // the receiver vouches for the payment with its address key
            if let Some(signature) = self.sign_payment_confirmation(builder)? {
                msg = msg
                    .add(TxParameterId::PaymentConfirmation, &signature)
                    .map_err(WalletError::from)?;
            }
        }

        self.send_tx_parameters(msg);
        Ok(())
    }

    fn sign_payment_confirmation(
        &self,
        builder: &TxBuilder,
    ) -> Result<Option<Signature>, UpdateError> {
        let (Some(peer_id), Some(my_id)) = (
            self.get_parameter::<WalletId>(TxParameterId::PeerId),
            self.get_parameter::<WalletId>(TxParameterId::MyId),
        ) else {
            return Ok(None);
        };
        let Some(address) = self.store.get_address(&my_id) else {
            return Ok(None);
        };
        if address.own_id == 0 {
            return Ok(None);
        }

        let confirmation = PaymentConfirmation {
            kernel_id: builder.kernel().map_err(WalletError::from)?.id(),
            value: self.get_mandatory(TxParameterId::Amount)?,
            sender: peer_id.0,
        };
        let key = self
            .store
            .master_kdf()
            .derive_address_key(address.own_id);
        Ok(Some(confirmation.sign(&key)))
    }

    fn confirm_transaction(&self, builder: &TxBuilder, send_utxos: bool) -> Result<(), UpdateError> {
        if self
            .get_parameter::<u32>(TxParameterId::PeerProtoVersion)
            .is_some()
        {
            // current protocol skips the explicit confirmation round
            return Ok(());
        }
        let mut msg = SetTxParameter::new(self.tx_id, self.my_id()?)
            .add(TxParameterId::PeerSignature, &builder.partial_signature())
            .map_err(WalletError::from)?;
        if send_utxos {
            msg = msg
                .add(TxParameterId::PeerInputs, &builder.inputs().to_vec())
                .and_then(|m| m.add(TxParameterId::PeerOutputs, &builder.outputs().to_vec()))
                .and_then(|m| m.add(TxParameterId::PeerOffset, &builder.offset()))
                .map_err(WalletError::from)?;
        }
        self.send_tx_parameters(msg);
        Ok(())
    }

    fn notify_transaction_registered(&self) -> Result<(), UpdateError> {
        let msg = SetTxParameter::new(self.tx_id, self.my_id()?)
            .add(TxParameterId::TransactionRegistered, &true)
            .map_err(WalletError::from)?;
        self.send_tx_parameters(msg);
        Ok(())
    }

    fn my_id(&self) -> Result<WalletId, WalletError> {
        self.get_mandatory(TxParameterId::MyId)
    }

    fn send_tx_parameters(&self, msg: SetTxParameter) -> bool {
        let (Some(my_id), Some(peer_id)) = (
            self.get_parameter::<WalletId>(TxParameterId::MyId),
            self.get_parameter::<WalletId>(TxParameterId::PeerId),
        ) else {
            return false;
        };
        let mut msg = msg;
        msg.tx_id = self.tx_id;
        msg.from = my_id;
        self.gateway.send_tx_params(peer_id, msg);
        true
    }

    fn is_self_tx(&self) -> Result<bool, WalletError> {
        let peer_id: WalletId = self.get_mandatory(TxParameterId::PeerId)?;
        Ok(self
            .store
            .get_address(&peer_id)
            .map(|address| address.own_id != 0)
            .unwrap_or(false))
    }

    fn confirm_kernel(&self, builder: &TxBuilder) -> Result<(), UpdateError> {
        self.update_tx_description(TxStatus::Registered);
        self.gateway
            .confirm_kernel(&self.tx_id, builder.kernel().map_err(WalletError::from)?);
        Ok(())
    }

    fn unconfirmed_outputs(&self) -> Vec<Coin> {
        let mut outputs = Vec::new();
        self.store.visit_coins(&mut |coin| {
            if (coin.create_tx_id.as_ref() == Some(&self.tx_id)
                && coin.status == CoinStatus::Incoming)
                || (coin.spent_tx_id.as_ref() == Some(&self.tx_id)
                    && coin.status == CoinStatus::Outgoing)
            {
                outputs.push(coin.clone());
            }
            true
        });
        outputs
    }

    fn update_tx_description(&self, status: TxStatus) {
        let _ = self.set_parameter(TxParameterId::Status, &status, true);
        let _ = self.set_parameter(
            TxParameterId::ModifyTime,
            &crate::types::timestamp_now(),
            false,
        );
    }

    fn on_failed(&self, reason: TxFailureReason, notify: bool) {
        if notify {
            self.notify_failure(reason);
        }
        if reason != TxFailureReason::Cancelled {
            let _ = self.set_parameter(TxParameterId::FailureReason, &reason, false);
        }
        self.update_tx_description(if reason == TxFailureReason::Cancelled {
            TxStatus::Cancelled
        } else {
            TxStatus::Failed
        });
        self.rollback();
        self.gateway.on_tx_completed(&self.tx_id);
    }

    /// Tell the peer, but only while the transaction could still have
    /// been valid on their side.
    fn notify_failure(&self, reason: TxFailureReason) {
        let status = self
            .get_parameter(TxParameterId::Status)
            .unwrap_or(TxStatus::Failed);
        if !matches!(status, TxStatus::Pending | TxStatus::InProgress) {
            return;
        }
        if let Ok(my_id) = self.my_id() {
            if let Ok(msg) =
                SetTxParameter::new(self.tx_id, my_id).add(TxParameterId::FailureReason, &reason)
            {
                self.send_tx_parameters(msg);
            }
        }
    }

    fn rollback(&self) {
        tracing::info!("[{}] rolling back coins", self.tx_id_str());
        self.store.rollback_tx(&self.tx_id);
    }

    fn complete_tx(&self) {
        tracing::info!("[{}] transaction completed", self.tx_id_str());
        self.update_tx_description(TxStatus::Completed);
        self.gateway.on_tx_completed(&self.tx_id);
    }
}
