use std::sync::{Arc, Mutex};

use umbra_wallet::crypto::{sha256, Scalar};
use umbra_wallet::kernel::{Transaction, TxKernel};
use umbra_wallet::params::{SetTxParameter, TxParameterId};
use umbra_wallet::storage::create_address;
use umbra_wallet::types::{
    Amount, BlockStateId, Coin, CoinStatus, Height, KeyType, TxDescription, TxId, TxStatus,
    WalletAddress, WalletId, EMPTY_COIN_SESSION, MATURITY_STD, MAX_HEIGHT,
};
use umbra_wallet::{MemoryStore, NodeGateway, TxFailureReason, Wallet, WalletStore};

#[derive(Default)]
struct TestNode {
    tip: Mutex<Option<BlockStateId>>,
    sent: Mutex<Vec<(WalletId, SetTxParameter)>>,
    registered: Mutex<Vec<(TxId, Transaction)>>,
    kernel_requests: Mutex<Vec<(TxId, TxKernel)>>,
}

impl TestNode {
    fn set_tip(&self, height: Height) {
        *self.tip.lock().unwrap() = Some(BlockStateId {
            height,
            hash: sha256(&height.to_le_bytes()),
        });
    }

    fn take_sent(&self) -> Vec<(WalletId, SetTxParameter)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn take_registered(&self) -> Vec<(TxId, Transaction)> {
        std::mem::take(&mut *self.registered.lock().unwrap())
    }

    fn take_kernel_requests(&self) -> Vec<(TxId, TxKernel)> {
        std::mem::take(&mut *self.kernel_requests.lock().unwrap())
    }
}

impl NodeGateway for TestNode {
    fn send_tx_params(&self, peer: WalletId, msg: SetTxParameter) {
        self.sent.lock().unwrap().push((peer, msg));
    }

    fn register_tx(&self, tx_id: TxId, tx: Transaction) {
        self.registered.lock().unwrap().push((tx_id, tx));
    }

    fn confirm_kernel(&self, tx_id: TxId, kernel: TxKernel) {
        self.kernel_requests.lock().unwrap().push((tx_id, kernel));
    }

    fn get_tip(&self) -> Option<BlockStateId> {
        *self.tip.lock().unwrap()
    }
}

struct Party {
    store: Arc<MemoryStore>,
    node: Arc<TestNode>,
    wallet: Wallet,
    address: WalletAddress,
}

fn party(seed: &[u8], height: Height) -> Party {
    let store = MemoryStore::new(sha256(seed));
    store.set_system_state_id(&BlockStateId {
        height,
        hash: sha256(b"genesis"),
    });
    let node = Arc::new(TestNode::default());
    node.set_tip(height);
    let wallet = Wallet::new(store.clone(), node.clone());
    let address = create_address(store.as_ref());
    Party {
        store,
        node,
        wallet,
        address,
    }
}

fn fund(store: &MemoryStore, values: &[Amount]) {
    for &value in values {
        let mut coin = Coin::new(value, CoinStatus::Available, KeyType::Regular);
        store.store_coin(&mut coin);
    }
}

fn coins(store: &MemoryStore) -> Vec<Coin> {
    let mut all = Vec::new();
    store.visit_coins(&mut |coin| {
        all.push(coin.clone());
        true
    });
    all
}

/// Shuttle parameter messages between the two parties until both go
/// quiet.
fn pump(a: &Party, b: &Party) {
    loop {
        let from_a = a.node.take_sent();
        let from_b = b.node.take_sent();
        if from_a.is_empty() && from_b.is_empty() {
            break;
        }
        for (to, msg) in from_a {
            assert_eq!(to, b.address.wallet_id);
            b.wallet.on_tx_parameters(b.address.wallet_id, msg);
        }
        for (to, msg) in from_b {
            assert_eq!(to, a.address.wallet_id);
            a.wallet.on_tx_parameters(a.address.wallet_id, msg);
        }
    }
}

fn desc(party: &Party, tx_id: &TxId) -> TxDescription {
    party.store.get_tx(tx_id).expect("transaction exists")
}

#[test]
fn two_party_payment_completes() {
    let alice = party(b"alice", 100);
    let bob = party(b"bob", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();

    pump(&alice, &bob);

    // bob answered the invitation and went straight to awaiting the
    // kernel proof
    assert_eq!(desc(&bob, &tx_id).status, TxStatus::Registered);
    assert!(!desc(&bob, &tx_id).sender);
    assert_eq!(desc(&bob, &tx_id).amount, 10);
    assert_eq!(bob.node.take_kernel_requests().len(), 1);

    // alice assembled and submitted the full transaction
    let registered = alice.node.take_registered();
    assert_eq!(registered.len(), 1);
    let (registered_id, tx) = &registered[0];
    assert_eq!(registered_id, &tx_id);
    assert!(tx.is_valid());
    assert_eq!(tx.kernels.len(), 1);
    assert_eq!(tx.kernels[0].fee, 1);
    assert_eq!(tx.inputs.len(), 2);
    // bob's output of 10 plus alice's change of 1
    assert_eq!(tx.outputs.len(), 2);

    // both sides agreed on the kernel
    assert_eq!(desc(&alice, &tx_id).kernel_id, desc(&bob, &tx_id).kernel_id);

    alice.wallet.on_tx_registered(tx_id, true);
    assert_eq!(alice.node.take_kernel_requests().len(), 1);

    alice.wallet.on_kernel_proof(tx_id, 101);
    bob.wallet.on_kernel_proof(tx_id, 101);

    assert_eq!(desc(&alice, &tx_id).status, TxStatus::Completed);
    assert_eq!(desc(&bob, &tx_id).status, TxStatus::Completed);

    // alice: both sixes spent, the 1-unit change matured in
    let alice_coins = coins(&alice.store);
    let spent: Vec<_> = alice_coins
        .iter()
        .filter(|c| c.status == CoinStatus::Spent)
        .collect();
    assert_eq!(spent.len(), 2);
    let change: Vec<_> = alice_coins
        .iter()
        .filter(|c| c.status == CoinStatus::Available)
        .collect();
    assert_eq!(change.len(), 1);
    assert_eq!(change[0].id.value, 1);
    assert_eq!(change[0].id.key_type, KeyType::Change);
    assert_eq!(change[0].confirm_height, 101);
    assert_eq!(change[0].maturity, 101 + MATURITY_STD);

    // bob: the payment arrived
    let bob_coins = coins(&bob.store);
    assert_eq!(bob_coins.len(), 1);
    assert_eq!(bob_coins[0].id.value, 10);
    assert_eq!(bob_coins[0].status, CoinStatus::Available);
    assert_eq!(bob_coins[0].confirm_height, 101);
}

#[test]
fn self_transaction_completes_without_peer_traffic() {
    let alice = party(b"self", 100);
    fund(&alice.store, &[6, 6]);
    let second = create_address(alice.store.as_ref());

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, second.wallet_id, 10, 1, 120)
        .unwrap();

    // no negotiation round for a self transaction
    assert!(alice.node.take_sent().is_empty());

    let registered = alice.node.take_registered();
    assert_eq!(registered.len(), 1);
    let tx = &registered[0].1;
    assert!(tx.is_valid());
    assert_eq!(tx.kernels[0].fee, 1);
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.outputs.len(), 2);

    alice.wallet.on_tx_registered(tx_id, true);
    alice.wallet.on_kernel_proof(tx_id, 101);

    assert_eq!(desc(&alice, &tx_id).status, TxStatus::Completed);

    let all = coins(&alice.store);
    let spent = all.iter().filter(|c| c.status == CoinStatus::Spent).count();
    assert_eq!(spent, 2);
    let mut available: Vec<Amount> = all
        .iter()
        .filter(|c| c.status == CoinStatus::Available)
        .map(|c| c.id.value)
        .collect();
    available.sort();
    assert_eq!(available, vec![1, 10]);
    assert!(all
        .iter()
        .filter(|c| c.status == CoinStatus::Available)
        .all(|c| c.confirm_height == 101 && c.maturity == 101 + MATURITY_STD));
}

#[test]
fn insufficient_funds_fail_without_touching_coins() {
    let alice = party(b"poor", 100);
    let bob = party(b"bob2", 100);
    fund(&alice.store, &[5]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();

    let d = desc(&alice, &tx_id);
    assert_eq!(d.status, TxStatus::Failed);
    assert_eq!(d.failure_reason, Some(TxFailureReason::NoInputs));
    assert!(alice.node.take_registered().is_empty());

    let all = coins(&alice.store);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, CoinStatus::Available);
    assert_eq!(all[0].session_id, EMPTY_COIN_SESSION);
}

#[test]
fn transaction_expires_past_max_height() {
    // height 40 + lifetime 60 pins MaxHeight to 100
    let alice = party(b"expiry", 40);
    let bob = party(b"silent", 40);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 60)
        .unwrap();
    assert_eq!(desc(&alice, &tx_id).max_height, 100);
    // the invitation went out but bob never answers
    assert_eq!(alice.node.take_sent().len(), 1);

    // tip exactly at MaxHeight: still alive
    alice.node.set_tip(100);
    alice.wallet.on_tip_changed();
    assert_eq!(desc(&alice, &tx_id).status, TxStatus::InProgress);

    // one block further: expired, coins back, peer told
    alice.node.set_tip(101);
    alice.wallet.on_tip_changed();
    let d = desc(&alice, &tx_id);
    assert_eq!(d.status, TxStatus::Failed);
    assert_eq!(d.failure_reason, Some(TxFailureReason::TransactionExpired));

    assert!(coins(&alice.store)
        .iter()
        .all(|c| c.status == CoinStatus::Available && c.session_id == EMPTY_COIN_SESSION));

    let sent = alice.node.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.get::<TxFailureReason>(TxParameterId::FailureReason),
        Some(TxFailureReason::TransactionExpired)
    );
}

#[test]
fn invalid_peer_signature_aborts_before_registration() {
    let alice = party(b"verify", 100);
    let bob = party(b"forger", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();

    // hand the invitation to bob, then tamper with his signature share
    for (_, msg) in alice.node.take_sent() {
        bob.wallet.on_tx_parameters(bob.address.wallet_id, msg);
    }
    let mut replies = bob.node.take_sent();
    assert_eq!(replies.len(), 1);
    let (_, reply) = &mut replies[0];
    let forged = bincode::serialize(&Scalar::from_u64(1234567)).unwrap();
    for (id, blob) in reply.params.iter_mut() {
        if *id == TxParameterId::PeerSignature {
            *blob = forged.clone();
        }
    }
    alice
        .wallet
        .on_tx_parameters(alice.address.wallet_id, replies.remove(0).1);

    let d = desc(&alice, &tx_id);
    assert_eq!(d.status, TxStatus::Failed);
    assert_eq!(d.failure_reason, Some(TxFailureReason::InvalidPeerSignature));
    // never reached the node
    assert!(alice.node.take_registered().is_empty());
    // coins rolled back
    assert!(coins(&alice.store)
        .iter()
        .all(|c| c.status == CoinStatus::Available));
    // the peer was notified
    let sent = alice.node.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .1
        .get::<TxFailureReason>(TxParameterId::FailureReason)
        .is_some());
}

#[test]
fn peer_injected_failure_is_accepted_silently() {
    let alice = party(b"victim", 100);
    let bob = party(b"quitter", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();
    alice.node.take_sent();
    assert_eq!(desc(&alice, &tx_id).status, TxStatus::InProgress);

    let msg = SetTxParameter::new(tx_id, bob.address.wallet_id)
        .add(
            TxParameterId::FailureReason,
            &TxFailureReason::InvalidTransaction,
        )
        .unwrap();
    alice.wallet.on_tx_parameters(alice.address.wallet_id, msg);

    let d = desc(&alice, &tx_id);
    assert_eq!(d.status, TxStatus::Failed);
    assert_eq!(d.failure_reason, Some(TxFailureReason::InvalidTransaction));
    // accepted without a failure echo back to the peer
    assert!(alice.node.take_sent().is_empty());
    assert!(coins(&alice.store)
        .iter()
        .all(|c| c.status == CoinStatus::Available));
}

#[test]
fn private_parameters_from_peer_are_rejected() {
    let alice = party(b"guarded", 100);
    let bob = party(b"sneaky", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();
    alice.node.take_sent();

    let msg = SetTxParameter::new(tx_id, bob.address.wallet_id)
        .add(TxParameterId::BlindingExcess, &Scalar::from_u64(1))
        .unwrap();
    alice.wallet.on_tx_parameters(alice.address.wallet_id, msg);

    // the secret stayed untouched: the tx is still alive and resumable
    assert_ne!(desc(&alice, &tx_id).status, TxStatus::Failed);
}

#[test]
fn cancel_pending_deletes_the_row() {
    let alice = party(b"cancel-pending", 100);
    let bob = party(b"nobody", 100);

    // a transaction that was prepared but never progressed
    let tx_id = umbra_wallet::types::generate_tx_id();
    alice.store.save_tx(&TxDescription {
        tx_id,
        amount: 1,
        fee: 1,
        change: 0,
        min_height: 0,
        max_height: MAX_HEIGHT,
        peer_id: bob.address.wallet_id,
        my_id: alice.address.wallet_id,
        create_time: 0,
        modify_time: 0,
        sender: true,
        status: TxStatus::Pending,
        failure_reason: None,
        kernel_id: None,
    });
    umbra_wallet::params::set_tx_parameter(
        alice.store.as_ref(),
        &tx_id,
        TxParameterId::Status,
        &TxStatus::Pending,
        false,
    )
    .unwrap();

    alice.wallet.cancel_tx(&tx_id);
    assert!(alice.store.get_tx(&tx_id).is_none());
}

#[test]
fn cancel_in_progress_rolls_back_and_notifies() {
    let alice = party(b"cancel-live", 100);
    let bob = party(b"peer", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();
    alice.node.take_sent();

    alice.wallet.cancel_tx(&tx_id);

    assert_eq!(desc(&alice, &tx_id).status, TxStatus::Cancelled);
    assert!(coins(&alice.store)
        .iter()
        .all(|c| c.status == CoinStatus::Available && c.session_id == EMPTY_COIN_SESSION));

    let sent = alice.node.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].1.get::<TxFailureReason>(TxParameterId::FailureReason),
        Some(TxFailureReason::Cancelled)
    );
}

#[test]
fn restart_resumes_from_persisted_parameters() {
    let alice = party(b"restart", 100);
    let bob = party(b"steady", 100);
    fund(&alice.store, &[6, 6]);

    let tx_id = alice
        .wallet
        .transfer_money(alice.address.wallet_id, bob.address.wallet_id, 10, 1, 120)
        .unwrap();
    pump(&alice, &bob);
    assert_eq!(alice.node.take_registered().len(), 1);

    // the process dies before the node answers; a new wallet instance
    // over the same store picks the negotiation back up
    let fresh_node = Arc::new(TestNode::default());
    fresh_node.set_tip(100);
    let revived = Wallet::new(alice.store.clone(), fresh_node.clone());
    revived.resume_all();

    let resubmitted = fresh_node.take_registered();
    assert_eq!(resubmitted.len(), 1);
    assert_eq!(resubmitted[0].0, tx_id);
    assert!(resubmitted[0].1.is_valid());
}
