use serde::{Deserialize, Serialize};

use crate::crypto::{self, Point, Scalar, Signature};
use crate::types::{Amount, Height};

/// The signed, publicly visible part of a transaction: fee, validity
/// height range and the Schnorr multisignature over the aggregated
/// excess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxKernel {
    pub fee: Amount,
    pub min_height: Height,
    pub max_height: Height,
    pub commitment: Point,
    pub signature: Signature,
}

impl TxKernel {
    pub fn new(fee: Amount, min_height: Height, max_height: Height) -> TxKernel {
        TxKernel {
            fee,
            min_height,
            max_height,
            commitment: Point::identity(),
            signature: Signature::zero(),
        }
    }

    /// Message both parties sign. Excludes the signature, so it is
    /// stable from partial signing through finalization.
    pub fn message(&self) -> [u8; 32] {
        let mut data = Vec::with_capacity(24 + 33 + 16);
        data.extend_from_slice(b"umbra.kernel");
        data.extend_from_slice(&self.fee.to_le_bytes());
        data.extend_from_slice(&self.min_height.to_le_bytes());
        data.extend_from_slice(&self.max_height.to_le_bytes());
        data.extend_from_slice(&self.commitment.to_bytes());
        crypto::sha256(&data)
    }

    /// Kernel id, quoted in payment confirmations and proof requests.
    pub fn id(&self) -> [u8; 32] {
        self.message()
    }

    pub fn is_valid(&self) -> bool {
        self.min_height <= self.max_height && self.signature.is_valid(&self.message(), &self.commitment)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub commitment: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub commitment: Point,
    /// Opaque confidentiality proof produced by the owner's child KDF.
    pub proof: Vec<u8>,
}

/// A fully assembled confidential transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub kernels: Vec<TxKernel>,
    pub offset: Scalar,
}

impl Transaction {
    /// Canonical form: inputs and outputs sorted by commitment,
    /// duplicates removed.
    pub fn normalize(&mut self) {
        self.inputs.sort_by_key(|i| i.commitment.to_bytes());
        self.inputs.dedup();
        self.outputs.sort_by_key(|o| o.commitment.to_bytes());
        self.outputs.dedup_by(|a, b| a.commitment == b.commitment);
    }

    /// Balance and signature check:
    /// `sum(inputs) - sum(outputs) - fee * H == sum(kernel excess) + offset * G`.
    pub fn is_valid(&self) -> bool {
        if self.kernels.is_empty() {
            return false;
        }
        if !self.kernels.iter().all(TxKernel::is_valid) {
            return false;
        }

        let sum_inputs = self
            .inputs
            .iter()
            .fold(Point::identity(), |acc, i| acc + i.commitment);
        let sum_outputs = self
            .outputs
            .iter()
            .fold(Point::identity(), |acc, o| acc + o.commitment);
        let total_fee: Amount = self.kernels.iter().map(|k| k.fee).sum();
        let sum_excess = self
            .kernels
            .iter()
            .fold(Point::identity(), |acc, k| acc + k.commitment);

        let lhs = sum_inputs - sum_outputs - crypto::commit(total_fee, &Scalar::zero());
        let rhs = sum_excess + self.offset.to_point();
        lhs == rhs
    }
}
