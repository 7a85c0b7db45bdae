use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::WalletStore;
use crate::types::{TxId, WalletId};

/// Identifiers of the transaction parameter bag. Values below
/// [`TxParameterId::PRIVATE_FIRST`] may arrive from the peer inside a
/// [`SetTxParameter`] message; everything above is local-only state and
/// is never accepted from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TxParameterId {
    TransactionType = 0,
    IsSender = 1,
    Amount = 2,
    Fee = 3,
    MinHeight = 4,
    MaxHeight = 5,
    PeerProtoVersion = 6,
    PeerPublicExcess = 7,
    PeerPublicNonce = 8,
    PeerSignature = 9,
    PeerInputs = 10,
    PeerOutputs = 11,
    PeerOffset = 12,
    TransactionRegistered = 13,
    FailureReason = 14,
    PaymentConfirmation = 15,

    IsInitiator = 128,
    Status = 129,
    State = 130,
    PeerId = 131,
    MyId = 132,
    MyAddressId = 133,
    Inputs = 134,
    Outputs = 135,
    Offset = 136,
    BlindingExcess = 137,
    MyNonce = 138,
    PartialSignature = 139,
    KernelId = 140,
    KernelProofHeight = 141,
    Change = 142,
    AmountList = 143,
    CreateTime = 144,
    ModifyTime = 145,
}

impl TxParameterId {
    pub const PRIVATE_FIRST: u32 = 128;

    /// Whether a peer is allowed to set this parameter.
    pub fn is_public(self) -> bool {
        (self as u32) < Self::PRIVATE_FIRST
    }

    /// Parameters whose change is surfaced to transaction observers.
    pub fn is_observable(self) -> bool {
        matches!(
            self,
            TxParameterId::Amount
                | TxParameterId::Fee
                | TxParameterId::MinHeight
                | TxParameterId::PeerId
                | TxParameterId::MyId
                | TxParameterId::CreateTime
                | TxParameterId::IsSender
                | TxParameterId::Status
                | TxParameterId::TransactionType
                | TxParameterId::KernelId
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Simple,
}

/// Parameter message exchanged between negotiating peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTxParameter {
    pub tx_id: TxId,
    pub from: WalletId,
    pub tx_type: TxType,
    pub params: Vec<(TxParameterId, Vec<u8>)>,
}

impl SetTxParameter {
    pub fn new(tx_id: TxId, from: WalletId) -> SetTxParameter {
        SetTxParameter {
            tx_id,
            from,
            tx_type: TxType::Simple,
            params: Vec::new(),
        }
    }

    pub fn add<T: Serialize>(mut self, id: TxParameterId, value: &T) -> Result<SetTxParameter> {
        self.params.push((id, bincode::serialize(value)?));
        Ok(self)
    }

    pub fn get<T: DeserializeOwned>(&self, id: TxParameterId) -> Option<T> {
        self.params
            .iter()
            .find(|(pid, _)| *pid == id)
            .and_then(|(_, blob)| bincode::deserialize(blob).ok())
    }
}

/// Typed read of a bag entry. A blob that no longer deserializes is
/// treated as absent and logged, so one corrupt value cannot wedge the
/// whole transaction.
pub fn get_tx_parameter<T: DeserializeOwned>(
    store: &dyn WalletStore,
    tx_id: &TxId,
    id: TxParameterId,
) -> Option<T> {
    let blob = store.get_tx_parameter_raw(tx_id, id)?;
    match bincode::deserialize(&blob) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("corrupt parameter {:?}: {}", id, e);
            None
        }
    }
}

/// Typed write. Returns whether the stored bytes actually changed.
pub fn set_tx_parameter<T: Serialize>(
    store: &dyn WalletStore,
    tx_id: &TxId,
    id: TxParameterId,
    value: &T,
    notify: bool,
) -> Result<bool> {
    Ok(store.set_tx_parameter_raw(tx_id, id, bincode::serialize(value)?, notify))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Point, Scalar};
    use crate::types::generate_tx_id;

    #[test]
    fn peer_visible_parameters_stay_below_the_private_range() {
        assert!(TxParameterId::Amount.is_public());
        assert!(TxParameterId::PeerSignature.is_public());
        assert!(TxParameterId::FailureReason.is_public());
        assert!(!TxParameterId::BlindingExcess.is_public());
        assert!(!TxParameterId::MyNonce.is_public());
        assert!(!TxParameterId::Status.is_public());
    }

    #[test]
    fn observable_set_matches_description_fields() {
        for id in [
            TxParameterId::Amount,
            TxParameterId::Fee,
            TxParameterId::MinHeight,
            TxParameterId::PeerId,
            TxParameterId::MyId,
            TxParameterId::CreateTime,
            TxParameterId::IsSender,
            TxParameterId::Status,
            TxParameterId::TransactionType,
            TxParameterId::KernelId,
        ] {
            assert!(id.is_observable(), "{:?}", id);
        }
        assert!(!TxParameterId::Offset.is_observable());
        assert!(!TxParameterId::MaxHeight.is_observable());
    }

    #[test]
    fn message_builder_roundtrips_values() {
        let from = WalletId(Scalar::from_u64(9).to_point());
        let msg = SetTxParameter::new(generate_tx_id(), from)
            .add(TxParameterId::Amount, &42u64)
            .unwrap()
            .add(TxParameterId::IsSender, &false)
            .unwrap()
            .add(TxParameterId::PeerPublicExcess, &Point::identity())
            .unwrap();

        assert_eq!(msg.get::<u64>(TxParameterId::Amount), Some(42));
        assert_eq!(msg.get::<bool>(TxParameterId::IsSender), Some(false));
        assert_eq!(
            msg.get::<Point>(TxParameterId::PeerPublicExcess),
            Some(Point::identity())
        );
        assert_eq!(msg.get::<u64>(TxParameterId::Fee), None);

        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: SetTxParameter = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }
}
