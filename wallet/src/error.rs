use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::TxParameterId;

/// Peer-facing failure codes. The numeric encoding travels in the
/// `FailureReason` transaction parameter, so variant order is part of the
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxFailureReason {
    Unknown,
    Cancelled,
    InvalidPeerSignature,
    FailedToRegister,
    InvalidTransaction,
    InvalidKernel,
    FailedToSendParameters,
    NoInputs,
    TransactionExpired,
    NoPaymentProof,
}

impl std::fmt::Display for TxFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            TxFailureReason::Unknown => "unexpected reason",
            TxFailureReason::Cancelled => "transaction cancelled",
            TxFailureReason::InvalidPeerSignature => "peer signature is not valid",
            TxFailureReason::FailedToRegister => "failed to register transaction",
            TxFailureReason::InvalidTransaction => "transaction is not valid",
            TxFailureReason::InvalidKernel => "invalid kernel proof provided",
            TxFailureReason::FailedToSendParameters => "failed to send tx parameters",
            TxFailureReason::NoInputs => "not enough inputs to build the transaction",
            TxFailureReason::TransactionExpired => "transaction expired",
            TxFailureReason::NoPaymentProof => "payment not signed by the receiver",
        };
        f.write_str(msg)
    }
}

/// Terminal negotiation failure. `notify` asks for a `FailureReason`
/// parameter message to the peer; it stays `false` when the error came
/// from the peer's own data.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct TxFailure {
    pub reason: TxFailureReason,
    pub notify: bool,
}

impl TxFailure {
    pub fn new(reason: TxFailureReason, notify: bool) -> TxFailure {
        TxFailure { reason, notify }
    }
}

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("mandatory parameter {0:?} is missing")]
    MissingParameter(TxParameterId),

    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("transaction builder has no kernel yet")]
    NoKernel,
}

/// Outcome of one negotiator step. A `Failure` terminates the
/// transaction through the rollback path; an `Internal` error is logged
/// and the transaction retries on its next trigger.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Failure(#[from] TxFailure),
    #[error(transparent)]
    Internal(#[from] WalletError),
}

pub type Result<T> = std::result::Result<T, WalletError>;
