use crate::crypto::{self, Point, Scalar};
use crate::error::{TxFailure, TxFailureReason, UpdateError, WalletError};
use crate::kernel::{Input, Output, Transaction, TxKernel};
use crate::negotiator::Negotiator;
use crate::params::TxParameterId;
use crate::types::{Amount, Coin, CoinStatus, Height, KeyType, MAX_HEIGHT};

/// Stateful builder for one transaction's half of the Schnorr multisig
/// kernel. Everything it derives is either persisted in the parameter
/// bag or re-derivable from persisted seeds, so a builder can be
/// reconstructed on every negotiation step.
pub struct TxBuilder<'a, 'w> {
    tx: &'a Negotiator<'w>,
    amount_list: Vec<Amount>,
    fee: Amount,
    change: Amount,
    min_height: Height,
    max_height: Height,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    offset: Scalar,
    blinding_excess: Scalar,
    nonce: Scalar,
    nonce_pub_total: Point,
    message: [u8; 32],
    partial_signature: Scalar,
    kernel: Option<TxKernel>,
    peer_public_excess: Point,
    peer_public_nonce: Point,
    peer_signature: Option<Scalar>,
    peer_inputs: Vec<Input>,
    peer_outputs: Vec<Output>,
    peer_offset: Scalar,
}

impl<'a, 'w> TxBuilder<'a, 'w> {
    pub fn new(tx: &'a Negotiator<'w>, amount_list: Vec<Amount>, fee: Amount) -> TxBuilder<'a, 'w> {
        TxBuilder {
            tx,
            amount_list,
            fee,
            change: 0,
            min_height: 0,
            max_height: MAX_HEIGHT,
            inputs: Vec::new(),
            outputs: Vec::new(),
            offset: Scalar::zero(),
            blinding_excess: Scalar::zero(),
            nonce: Scalar::zero(),
            nonce_pub_total: Point::identity(),
            message: [0u8; 32],
            partial_signature: Scalar::zero(),
            kernel: None,
            peer_public_excess: Point::identity(),
            peer_public_nonce: Point::identity(),
            peer_signature: None,
            peer_inputs: Vec::new(),
            peer_outputs: Vec::new(),
            peer_offset: Scalar::zero(),
        }
    }

    /// Restore persisted builder state. Returns whether the expensive
    /// initial setup (input selection, output creation) already ran.
    pub fn load_initial_params(&mut self) -> bool {
        if let Some(inputs) = self.tx.get_parameter(TxParameterId::Inputs) {
            self.inputs = inputs;
        }
        if let Some(outputs) = self.tx.get_parameter(TxParameterId::Outputs) {
            self.outputs = outputs;
        }
        if let Some(min) = self.tx.get_parameter(TxParameterId::MinHeight) {
            self.min_height = min;
        }
        if let Some(max) = self.tx.get_parameter(TxParameterId::MaxHeight) {
            self.max_height = max;
        }
        let excess: Option<Scalar> = self.tx.get_parameter(TxParameterId::BlindingExcess);
        let offset: Option<Scalar> = self.tx.get_parameter(TxParameterId::Offset);
        if let Some(excess) = excess {
            self.blinding_excess = excess;
        }
        if let Some(offset) = offset {
            self.offset = offset;
        }
        excess.is_some() && offset.is_some()
    }

    /// Pick inputs covering amount plus fee, mark them Outgoing, fold
    /// their blinding factors into the offset and persist the result.
    pub fn select_inputs(&mut self) -> Result<(), UpdateError> {
        let amount_with_fee = self.amount() + self.fee;
        let coins = self.tx.store().select_coins(amount_with_fee, true);
        if coins.is_empty() {
            tracing::error!(
                "only {} available, {} needed",
                self.tx.store().get_available(),
                amount_with_fee
            );
            return Err(TxFailure::new(TxFailureReason::NoInputs, true).into());
        }

        let mut total: Amount = 0;
        let mut locked = Vec::with_capacity(coins.len());
        for mut coin in coins {
            coin.spent_tx_id = Some(*self.tx.tx_id());
            coin.status = CoinStatus::Outgoing;

            let (blinding, commitment) = self.tx.store().calc_commitment(&coin.id);
            self.inputs.push(Input { commitment });
            self.offset = self.offset + blinding;
            total += coin.id.value;
            locked.push(coin);
        }
        self.change += total - amount_with_fee;

        self.tx
            .set_parameter(TxParameterId::Change, &self.change, false)?;
        self.tx
            .set_parameter(TxParameterId::Inputs, &self.inputs, false)?;
        self.tx
            .set_parameter(TxParameterId::Offset, &self.offset, false)?;
        self.tx.store().save_coins(&locked);
        Ok(())
    }

    pub fn add_change_output(&mut self) -> Result<(), UpdateError> {
        if self.change == 0 {
            return Ok(());
        }
        self.add_output(self.change, true)
    }

    /// Allocate an Incoming coin for `amount` and append its output,
    /// subtracting the output blinding from the offset.
    pub fn add_output(&mut self, amount: Amount, is_change: bool) -> Result<(), UpdateError> {
        let output = self.create_output(amount, is_change)?;
        self.outputs.push(output);
        Ok(())
    }

    fn create_output(&mut self, amount: Amount, is_change: bool) -> Result<Output, UpdateError> {
        let key_type = if is_change {
            KeyType::Change
        } else {
            KeyType::Regular
        };
        let mut coin = Coin::new(amount, CoinStatus::Incoming, key_type);
        coin.create_tx_id = Some(*self.tx.tx_id());
        coin.create_height = self.min_height;
        self.tx.store().store_coin(&mut coin);

        let (blinding, commitment) = self.tx.store().calc_commitment(&coin.id);
        let mut proof_data = Vec::with_capacity(18 + 33 + 32);
        proof_data.extend_from_slice(b"umbra.output.proof");
        proof_data.extend_from_slice(&commitment.to_bytes());
        proof_data.extend_from_slice(&blinding.to_bytes());
        let proof = crypto::sha256(&proof_data).to_vec();

        self.offset = self.offset - blinding;
        Ok(Output { commitment, proof })
    }

    pub fn finalize_outputs(&mut self) -> Result<(), UpdateError> {
        self.tx
            .set_parameter(TxParameterId::Outputs, &self.outputs, false)?;
        self.tx
            .set_parameter(TxParameterId::Offset, &self.offset, false)?;
        Ok(())
    }

    /// Build the kernel skeleton and this party's multisig secrets. The
    /// blinding excess comes from a freshly allocated key index on first
    /// run; the nonce is derived from a persisted random seed, so a
    /// replay of the same transaction yields the same nonce. The excess
    /// sign flips after folding into the offset.
    pub fn create_kernel(&mut self) -> Result<(), UpdateError> {
        if self.kernel.is_some() {
            return Ok(());
        }

        match self.tx.get_parameter(TxParameterId::BlindingExcess) {
            Some(excess) => self.blinding_excess = excess,
            None => {
                let kid = self.tx.store().allocate_kid_range(1);
                let excess = self.tx.store().master_kdf().derive_kernel_key(kid);
                self.tx
                    .set_parameter(TxParameterId::BlindingExcess, &excess, false)?;
                self.blinding_excess = excess;
            }
        }
        self.offset = self.offset + self.blinding_excess;
        self.blinding_excess = -self.blinding_excess;

        let seed: [u8; 32] = match self.tx.get_parameter(TxParameterId::MyNonce) {
            Some(seed) => seed,
            None => {
                let seed: [u8; 32] = rand::random();
                self.tx
                    .set_parameter(TxParameterId::MyNonce, &seed, false)?;
                seed
            }
        };
        self.nonce = self.tx.store().master_kdf().derive_from_seed(&seed);

        self.kernel = Some(TxKernel::new(self.fee, self.min_height, self.max_height));
        Ok(())
    }

    pub fn public_excess(&self) -> Point {
        self.blinding_excess.to_point()
    }

    pub fn public_nonce(&self) -> Point {
        self.nonce.to_point()
    }

    pub fn load_peer_public_excess_and_nonce(&mut self) -> bool {
        let excess: Option<Point> = self.tx.get_parameter(TxParameterId::PeerPublicExcess);
        let nonce: Option<Point> = self.tx.get_parameter(TxParameterId::PeerPublicNonce);
        match (excess, nonce) {
            (Some(excess), Some(nonce)) => {
                self.peer_public_excess = excess;
                self.peer_public_nonce = nonce;
                true
            }
            _ => false,
        }
    }

    pub fn load_peer_signature(&mut self) -> bool {
        match self.tx.get_parameter(TxParameterId::PeerSignature) {
            Some(k) => {
                self.peer_signature = Some(k);
                true
            }
            None => false,
        }
    }

    pub fn load_peer_inputs_and_outputs(&mut self) -> bool {
        let has_inputs = match self.tx.get_parameter(TxParameterId::PeerInputs) {
            Some(inputs) => {
                self.peer_inputs = inputs;
                true
            }
            None => false,
        };
        let outputs: Option<Vec<Output>> = self.tx.get_parameter(TxParameterId::PeerOutputs);
        let offset: Option<Scalar> = self.tx.get_parameter(TxParameterId::PeerOffset);
        let has_outputs = match (outputs, offset) {
            (Some(outputs), Some(offset)) => {
                self.peer_outputs = outputs;
                self.peer_offset = offset;
                true
            }
            _ => false,
        };
        has_inputs || has_outputs
    }

    /// Aggregate both excesses into the kernel commitment, fix the
    /// signed message, and produce this party's signature share.
    pub fn sign_partial(&mut self) -> Result<(), UpdateError> {
        let commitment = self.public_excess() + self.peer_public_excess;
        let kernel = self.kernel.as_mut().ok_or(WalletError::NoKernel)?;
        kernel.commitment = commitment;
        self.message = kernel.message();

        self.nonce_pub_total = self.public_nonce() + self.peer_public_nonce;
        self.partial_signature = crypto::sign_partial(
            &self.blinding_excess,
            &self.nonce,
            &self.nonce_pub_total,
            &self.message,
        );
        self.store_kernel_id()?;
        Ok(())
    }

    pub fn finalize_signature(&mut self) -> Result<(), UpdateError> {
        let nonce_pub = self.public_nonce() + self.peer_public_nonce;
        let k = self.partial_signature + self.peer_signature.unwrap_or(Scalar::zero());
        let kernel = self.kernel.as_mut().ok_or(WalletError::NoKernel)?;
        kernel.signature = crypto::Signature { nonce_pub, k };
        self.store_kernel_id()?;
        Ok(())
    }

    /// An absent peer share degenerates to the zero share, which checks
    /// out against identity peer points; that is exactly the self-tx
    /// case where both halves live in this wallet.
    pub fn is_peer_signature_valid(&self) -> bool {
        let k = self.peer_signature.unwrap_or(Scalar::zero());
        crypto::verify_partial(
            &k,
            &self.nonce_pub_total,
            &self.message,
            &self.peer_public_nonce,
            &self.peer_public_excess,
        )
    }

    /// Assemble the final transaction, merging the peer's inputs and
    /// outputs and summing the offsets.
    pub fn create_transaction(&mut self) -> Result<Transaction, UpdateError> {
        let kernel = self.kernel.clone().ok_or(WalletError::NoKernel)?;
        tracing::info!(
            "[{}] transaction created, kernel: {}",
            self.tx.tx_id_str(),
            hex::encode(kernel.id())
        );

        let mut inputs = self.inputs.clone();
        inputs.extend(self.peer_inputs.iter().cloned());
        let mut outputs = self.outputs.clone();
        outputs.extend(self.peer_outputs.iter().cloned());

        let mut transaction = Transaction {
            inputs,
            outputs,
            kernels: vec![kernel],
            offset: self.offset + self.peer_offset,
        };
        transaction.normalize();
        Ok(transaction)
    }

    pub fn amount(&self) -> Amount {
        self.amount_list.iter().sum()
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn offset(&self) -> Scalar {
        self.offset
    }

    pub fn partial_signature(&self) -> Scalar {
        self.partial_signature
    }

    pub fn amount_list(&self) -> &[Amount] {
        &self.amount_list
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn min_height(&self) -> Height {
        self.min_height
    }

    pub fn max_height(&self) -> Height {
        self.max_height
    }

    pub fn kernel(&self) -> Result<&TxKernel, WalletError> {
        self.kernel.as_ref().ok_or(WalletError::NoKernel)
    }

    fn store_kernel_id(&self) -> Result<(), UpdateError> {
        let kernel = self.kernel.as_ref().ok_or(WalletError::NoKernel)?;
        self.tx
            .set_parameter(TxParameterId::KernelId, &kernel.id(), true)?;
        Ok(())
    }
}
