use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use crate::crypto::{self, Kdf, Point, Scalar};
use crate::params::TxParameterId;
use crate::types::{
    Amount, BlockStateId, ChangeAction, Coin, CoinId, CoinStatus, Height, TxDescription, TxId,
    WalletAddress, WalletId, WalletObserver, EMPTY_COIN_SESSION, MAX_HEIGHT,
};

/// Persistent wallet state consumed by the negotiation core: coins,
/// transaction history, the typed parameter bag, the address book and
/// key derivation. Backends hide their on-disk format behind this trait;
/// [`MemoryStore`] is the reference implementation.
pub trait WalletStore: Send + Sync {
    fn master_kdf(&self) -> Kdf;
    fn child_kdf(&self, sub_idx: u32) -> Kdf {
        self.master_kdf().child(sub_idx)
    }
    /// Reserve `count` consecutive key indexes and return the first.
    fn allocate_kid_range(&self, count: u64) -> u64;

    /// Blinding factor and Pedersen commitment of an owned coin.
    fn calc_commitment(&self, id: &CoinId) -> (Scalar, Point) {
        let sk = self.child_kdf(id.sub_idx).derive_coin_key(id);
        let commitment = crypto::commit(id.value, &sk);
        (sk, commitment)
    }

    /// Just-enough greedy selection over Available coins, smallest
    /// first. Empty when the available total cannot cover `amount`.
    /// With `lock` every selected coin is stamped with one fresh
    /// non-zero session id.
    fn select_coins(&self, amount: Amount, lock: bool) -> Vec<Coin>;
    fn coins_created_by_tx(&self, tx_id: &TxId) -> Vec<Coin>;
    /// Insert a new coin, assigning its key index.
    fn store_coin(&self, coin: &mut Coin);
    fn save_coin(&self, coin: &Coin);
    fn save_coins(&self, coins: &[Coin]);
    fn remove_coin(&self, id: &CoinId);
    fn find_coin(&self, coin: &mut Coin) -> bool;
    fn visit_coins(&self, visitor: &mut dyn FnMut(&Coin) -> bool);
    fn get_available(&self) -> Amount {
        self.get_total(CoinStatus::Available)
    }
    fn get_total(&self, status: CoinStatus) -> Amount;
    /// Drop confirmations at or above `min_height` after a chain
    /// reorganization.
    fn rollback_confirmed_utxo(&self, min_height: Height);

    fn current_height(&self) -> Height;
    fn set_system_state_id(&self, id: &BlockStateId);
    fn get_system_state_id(&self) -> Option<BlockStateId>;

    fn tx_history(&self) -> Vec<TxDescription>;
    fn get_tx(&self, tx_id: &TxId) -> Option<TxDescription>;
    fn save_tx(&self, tx: &TxDescription);
    fn delete_tx(&self, tx_id: &TxId);
    /// Revert every coin change made on behalf of `tx_id`, all or
    /// nothing: created coins disappear, spent coins become Available
    /// again, session locks clear.
    fn rollback_tx(&self, tx_id: &TxId);

    fn get_addresses(&self, own: bool) -> Vec<WalletAddress>;
    fn get_address(&self, id: &WalletId) -> Option<WalletAddress>;
    fn save_address(&self, address: &WalletAddress);
    fn delete_address(&self, id: &WalletId);
    fn set_never_expiration_for_all(&self);

    /// Raw parameter write. Returns `false` when the stored bytes are
    /// already identical, in which case observers are not told either.
    fn set_tx_parameter_raw(
        &self,
        tx_id: &TxId,
        id: TxParameterId,
        blob: Vec<u8>,
        notify: bool,
    ) -> bool;
    fn get_tx_parameter_raw(&self, tx_id: &TxId, id: TxParameterId) -> Option<Vec<u8>>;

    fn change_password(&self, password: &str);

    fn subscribe(&self, observer: &Arc<dyn WalletObserver>);
    fn unsubscribe(&self, observer: &Arc<dyn WalletObserver>);
}

/// Create (and persist) a fresh own address whose public identity is
/// derived from the wallet's master KDF.
pub fn create_address(store: &dyn WalletStore) -> WalletAddress {
    let own_id = store.allocate_kid_range(1);
    let address = WalletAddress {
        wallet_id: WalletId(store.master_kdf().derive_address_key(own_id).to_point()),
        label: String::new(),
        category: String::new(),
        create_time: crate::types::timestamp_now(),
        duration: 24 * 60 * 60,
        own_id,
    };
    store.save_address(&address);
    address
}

enum Event {
    Coins,
    Tx(ChangeAction, Vec<TxDescription>),
    SystemState,
    Address,
}

#[derive(Default)]
struct Inner {
    coins: BTreeMap<u64, Coin>,
    txs: HashMap<TxId, TxDescription>,
    params: BTreeMap<(TxId, TxParameterId), Vec<u8>>,
    addresses: HashMap<WalletId, WalletAddress>,
    system_state: Option<BlockStateId>,
    next_kid: u64,
    next_session: u64,
    password: String,
}

/// In-memory wallet store. Mutation happens under one lock; observer
/// fan-out runs after the lock is released, so every notification sees a
/// fully applied write.
pub struct MemoryStore {
    kdf: Kdf,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<Weak<dyn WalletObserver>>>,
}

impl MemoryStore {
    pub fn new(seed: [u8; 32]) -> Arc<MemoryStore> {
        Arc::new(MemoryStore {
            kdf: Kdf::from_seed(seed),
            inner: Mutex::new(Inner {
                next_kid: 1,
                next_session: 0,
                ..Inner::default()
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn notify(&self, event: Event) {
        let subscribers: Vec<Arc<dyn WalletObserver>> = {
            let mut list = self.subscribers.lock().unwrap();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for sub in subscribers {
            match &event {
                Event::Coins => sub.on_coins_changed(),
                Event::Tx(action, items) => sub.on_transaction_changed(*action, items),
                Event::SystemState => sub.on_system_state_changed(),
                Event::Address => sub.on_address_changed(),
            }
        }
    }
}

/// Old blobs may still carry the deprecated change status; it is folded
/// into `Incoming` on every write path.
fn migrate_status(coin: &mut Coin) {
    if coin.status == CoinStatus::ChangeV0 {
        coin.status = CoinStatus::Incoming;
    }
}

fn apply_param_to_desc(desc: &mut TxDescription, id: TxParameterId, blob: &[u8]) {
    fn de<T: serde::de::DeserializeOwned>(blob: &[u8]) -> Option<T> {
        bincode::deserialize(blob).ok()
    }
    match id {
        TxParameterId::Amount => {
            if let Some(v) = de(blob) {
                desc.amount = v;
            }
        }
        TxParameterId::Fee => {
            if let Some(v) = de(blob) {
                desc.fee = v;
            }
        }
        TxParameterId::Change => {
            if let Some(v) = de(blob) {
                desc.change = v;
            }
        }
        TxParameterId::MinHeight => {
            if let Some(v) = de(blob) {
                desc.min_height = v;
            }
        }
        TxParameterId::MaxHeight => {
            if let Some(v) = de(blob) {
                desc.max_height = v;
            }
        }
        TxParameterId::PeerId => {
            if let Some(v) = de(blob) {
                desc.peer_id = v;
            }
        }
        TxParameterId::MyId => {
            if let Some(v) = de(blob) {
                desc.my_id = v;
            }
        }
        TxParameterId::IsSender => {
            if let Some(v) = de(blob) {
                desc.sender = v;
            }
        }
        TxParameterId::Status => {
            if let Some(v) = de(blob) {
                desc.status = v;
            }
        }
        TxParameterId::CreateTime => {
            if let Some(v) = de(blob) {
                desc.create_time = v;
            }
        }
        TxParameterId::ModifyTime => {
            if let Some(v) = de(blob) {
                desc.modify_time = v;
            }
        }
        TxParameterId::KernelId => desc.kernel_id = de(blob),
        TxParameterId::FailureReason => desc.failure_reason = de(blob),
        _ => {}
    }
}

impl WalletStore for MemoryStore {
    fn master_kdf(&self) -> Kdf {
        self.kdf.clone()
    }

    fn allocate_kid_range(&self, count: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let first = inner.next_kid;
        inner.next_kid += count;
        first
    }

    fn select_coins(&self, amount: Amount, lock: bool) -> Vec<Coin> {
        let mut inner = self.inner.lock().unwrap();

        let mut candidates: Vec<(Amount, u64)> = inner
            .coins
            .values()
            .filter(|c| c.status == CoinStatus::Available && c.session_id == EMPTY_COIN_SESSION)
            .map(|c| (c.id.value, c.id.idx))
            .collect();
        candidates.sort();

        let total: Amount = candidates.iter().map(|(value, _)| value).sum();
        if total < amount {
            return Vec::new();
        }

        let mut chosen = Vec::new();
        let mut sum: Amount = 0;
        for (value, idx) in candidates {
            if sum >= amount {
                break;
            }
            sum += value;
            chosen.push(idx);
        }

        let session = if lock {
            inner.next_session += 1;
            inner.next_session
        } else {
            EMPTY_COIN_SESSION
        };

        let mut result = Vec::with_capacity(chosen.len());
        for idx in chosen {
            let coin = inner.coins.get_mut(&idx).unwrap();
            if lock {
                coin.session_id = session;
            }
            result.push(coin.clone());
        }
        drop(inner);

        if lock && !result.is_empty() {
            self.notify(Event::Coins);
        }
        result
    }

    fn coins_created_by_tx(&self, tx_id: &TxId) -> Vec<Coin> {
        let inner = self.inner.lock().unwrap();
        inner
            .coins
            .values()
            .filter(|c| c.create_tx_id.as_ref() == Some(tx_id))
            .cloned()
            .collect()
    }

    fn store_coin(&self, coin: &mut Coin) {
        migrate_status(coin);
        let mut inner = self.inner.lock().unwrap();
        coin.id.idx = inner.next_kid;
        inner.next_kid += 1;
        inner.coins.insert(coin.id.idx, coin.clone());
        drop(inner);
        self.notify(Event::Coins);
    }

    fn save_coin(&self, coin: &Coin) {
        let mut coin = coin.clone();
        migrate_status(&mut coin);
        let mut inner = self.inner.lock().unwrap();
        inner.coins.insert(coin.id.idx, coin);
        drop(inner);
        self.notify(Event::Coins);
    }

    fn save_coins(&self, coins: &[Coin]) {
        if coins.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for coin in coins {
            let mut coin = coin.clone();
            migrate_status(&mut coin);
            inner.coins.insert(coin.id.idx, coin);
        }
        drop(inner);
        self.notify(Event::Coins);
    }

    fn remove_coin(&self, id: &CoinId) {
        let removed = self.inner.lock().unwrap().coins.remove(&id.idx).is_some();
        if removed {
            self.notify(Event::Coins);
        }
    }

    fn find_coin(&self, coin: &mut Coin) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.coins.get(&coin.id.idx) {
            Some(found) => {
                *coin = found.clone();
                true
            }
            None => false,
        }
    }

    fn visit_coins(&self, visitor: &mut dyn FnMut(&Coin) -> bool) {
        let coins: Vec<Coin> = {
            let inner = self.inner.lock().unwrap();
            inner.coins.values().cloned().collect()
        };
        for coin in &coins {
            if !visitor(coin) {
                break;
            }
        }
    }

    fn get_total(&self, status: CoinStatus) -> Amount {
        let inner = self.inner.lock().unwrap();
        inner
            .coins
            .values()
            .filter(|c| c.status == status)
            .map(|c| c.id.value)
            .sum()
    }

    fn rollback_confirmed_utxo(&self, min_height: Height) {
        let mut inner = self.inner.lock().unwrap();
        for coin in inner.coins.values_mut() {
            if coin.confirm_height != MAX_HEIGHT && coin.confirm_height >= min_height {
                coin.status = match coin.status {
                    CoinStatus::Available => CoinStatus::Incoming,
                    CoinStatus::Spent => CoinStatus::Outgoing,
                    other => other,
                };
                coin.confirm_height = MAX_HEIGHT;
                coin.maturity = MAX_HEIGHT;
            }
        }
        drop(inner);
        self.notify(Event::Coins);
    }

    fn current_height(&self) -> Height {
        self.inner
            .lock()
            .unwrap()
            .system_state
            .map(|s| s.height)
            .unwrap_or(0)
    }

    fn set_system_state_id(&self, id: &BlockStateId) {
        self.inner.lock().unwrap().system_state = Some(*id);
        self.notify(Event::SystemState);
    }

    fn get_system_state_id(&self) -> Option<BlockStateId> {
        self.inner.lock().unwrap().system_state
    }

    fn tx_history(&self) -> Vec<TxDescription> {
        let inner = self.inner.lock().unwrap();
        let mut history: Vec<TxDescription> = inner.txs.values().cloned().collect();
        history.sort_by_key(|tx| std::cmp::Reverse(tx.create_time));
        history
    }

    fn get_tx(&self, tx_id: &TxId) -> Option<TxDescription> {
        self.inner.lock().unwrap().txs.get(tx_id).cloned()
    }

    fn save_tx(&self, tx: &TxDescription) {
        let mut inner = self.inner.lock().unwrap();
        let action = if inner.txs.insert(tx.tx_id, tx.clone()).is_some() {
            ChangeAction::Updated
        } else {
            ChangeAction::Added
        };
        drop(inner);
        self.notify(Event::Tx(action, vec![tx.clone()]));
    }

    fn delete_tx(&self, tx_id: &TxId) {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.txs.remove(tx_id);
        inner.params.retain(|(id, _), _| id != tx_id);
        drop(inner);
        if let Some(desc) = removed {
            self.notify(Event::Tx(ChangeAction::Removed, vec![desc]));
        }
    }

    fn rollback_tx(&self, tx_id: &TxId) {
        let mut inner = self.inner.lock().unwrap();
        let mut doomed = Vec::new();
        for (idx, coin) in inner.coins.iter_mut() {
            if coin.create_tx_id.as_ref() == Some(tx_id) {
                if coin.status == CoinStatus::Incoming {
                    doomed.push(*idx);
                } else {
                    coin.create_tx_id = None;
                }
            }
            if coin.spent_tx_id.as_ref() == Some(tx_id) {
                if coin.status == CoinStatus::Outgoing {
                    coin.status = CoinStatus::Available;
                }
                coin.spent_tx_id = None;
                coin.session_id = EMPTY_COIN_SESSION;
            }
        }
        for idx in doomed {
            inner.coins.remove(&idx);
        }
        drop(inner);
        self.notify(Event::Coins);
    }

    fn get_addresses(&self, own: bool) -> Vec<WalletAddress> {
        let inner = self.inner.lock().unwrap();
        inner
            .addresses
            .values()
            .filter(|a| (a.own_id != 0) == own)
            .cloned()
            .collect()
    }

    fn get_address(&self, id: &WalletId) -> Option<WalletAddress> {
        self.inner.lock().unwrap().addresses.get(id).cloned()
    }

    fn save_address(&self, address: &WalletAddress) {
        self.inner
            .lock()
            .unwrap()
            .addresses
            .insert(address.wallet_id, address.clone());
        self.notify(Event::Address);
    }

    fn delete_address(&self, id: &WalletId) {
        let removed = self.inner.lock().unwrap().addresses.remove(id).is_some();
        if removed {
            self.notify(Event::Address);
        }
    }

    fn set_never_expiration_for_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for address in inner.addresses.values_mut() {
            if address.own_id != 0 {
                address.duration = 0;
            }
        }
        drop(inner);
        self.notify(Event::Address);
    }

    fn set_tx_parameter_raw(
        &self,
        tx_id: &TxId,
        id: TxParameterId,
        blob: Vec<u8>,
        notify: bool,
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let key = (*tx_id, id);
        if inner.params.get(&key).map(Vec::as_slice) == Some(blob.as_slice()) {
            return false;
        }
        inner.params.insert(key, blob.clone());

        let mut event = None;
        if let Some(desc) = inner.txs.get_mut(tx_id) {
            apply_param_to_desc(desc, id, &blob);
            if notify && id.is_observable() {
                event = Some(desc.clone());
            }
        }
        drop(inner);

        if let Some(desc) = event {
            self.notify(Event::Tx(ChangeAction::Updated, vec![desc]));
        }
        true
    }

    fn get_tx_parameter_raw(&self, tx_id: &TxId, id: TxParameterId) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().params.get(&(*tx_id, id)).cloned()
    }

    fn change_password(&self, password: &str) {
        self.inner.lock().unwrap().password = password.to_owned();
    }

    fn subscribe(&self, observer: &Arc<dyn WalletObserver>) {
        self.subscribers
            .lock()
            .unwrap()
            .push(Arc::downgrade(observer));
    }

    fn unsubscribe(&self, observer: &Arc<dyn WalletObserver>) {
        self.subscribers.lock().unwrap().retain(|weak| {
            weak.upgrade()
                .map(|strong| !Arc::ptr_eq(&strong, observer))
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;
    use crate::params::set_tx_parameter;
    use crate::types::{generate_tx_id, KeyType, TxStatus};

    fn store_with_coins(values: &[Amount]) -> Arc<MemoryStore> {
        let store = MemoryStore::new(sha256(b"store-test"));
        for &value in values {
            let mut coin = Coin::new(value, CoinStatus::Available, KeyType::Regular);
            store.store_coin(&mut coin);
        }
        store
    }

    fn pending_desc(tx_id: TxId) -> TxDescription {
        TxDescription {
            tx_id,
            amount: 0,
            fee: 0,
            change: 0,
            min_height: 0,
            max_height: MAX_HEIGHT,
            peer_id: WalletId(Point::identity()),
            my_id: WalletId(Point::identity()),
            create_time: 0,
            modify_time: 0,
            sender: true,
            status: TxStatus::Pending,
            failure_reason: None,
            kernel_id: None,
        }
    }

    #[test]
    fn selection_is_empty_when_insufficient() {
        let store = store_with_coins(&[2, 3]);
        assert!(store.select_coins(6, true).is_empty());
        // a failed selection must not lock anything
        assert_eq!(store.select_coins(5, true).len(), 2);
    }

    #[test]
    fn selection_is_greedy_ascending_and_just_enough() {
        let store = store_with_coins(&[10, 1, 2, 7]);
        let coins = store.select_coins(3, false);
        let values: Vec<Amount> = coins.iter().map(|c| c.id.value).collect();
        assert_eq!(values, vec![1, 2]);

        let coins = store.select_coins(11, false);
        let total: Amount = coins.iter().map(|c| c.id.value).sum();
        assert!(total >= 11);
    }

    #[test]
    fn locking_stamps_one_fresh_session() {
        let store = store_with_coins(&[5, 5, 5]);
        let first = store.select_coins(8, true);
        let session = first[0].session_id;
        assert_ne!(session, EMPTY_COIN_SESSION);
        assert!(first.iter().all(|c| c.session_id == session));

        // locked coins are invisible to the next selection
        let second = store.select_coins(8, true);
        assert!(second.is_empty());
        let third = store.select_coins(5, true);
        assert_eq!(third.len(), 1);
        assert_ne!(third[0].session_id, session);
    }

    #[test]
    fn rollback_restores_pre_tx_state() {
        let store = store_with_coins(&[6, 6]);
        let tx_id = generate_tx_id();

        let mut spent = store.select_coins(12, true);
        for coin in &mut spent {
            coin.status = CoinStatus::Outgoing;
            coin.spent_tx_id = Some(tx_id);
        }
        store.save_coins(&spent);

        let mut created = Coin::new(11, CoinStatus::Incoming, KeyType::Regular);
        created.create_tx_id = Some(tx_id);
        store.store_coin(&mut created);

        store.rollback_tx(&tx_id);

        let mut referencing = 0;
        store.visit_coins(&mut |coin| {
            assert_eq!(coin.status, CoinStatus::Available);
            assert_eq!(coin.session_id, EMPTY_COIN_SESSION);
            if coin.create_tx_id == Some(tx_id) || coin.spent_tx_id == Some(tx_id) {
                referencing += 1;
            }
            true
        });
        assert_eq!(referencing, 0);
        assert_eq!(store.get_available(), 12);
    }

    #[test]
    fn parameter_roundtrip_and_change_detection() {
        let store = MemoryStore::new(sha256(b"params"));
        let tx_id = generate_tx_id();

        let scalar = Scalar::from_u64(77);
        assert!(set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::BlindingExcess,
            &scalar,
            false
        )
        .unwrap());
        assert_eq!(
            crate::params::get_tx_parameter::<Scalar>(
                store.as_ref(),
                &tx_id,
                TxParameterId::BlindingExcess
            ),
            Some(scalar)
        );

        // identical bytes: untouched
        assert!(!set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::BlindingExcess,
            &scalar,
            false
        )
        .unwrap());
        assert!(set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::BlindingExcess,
            &Scalar::from_u64(78),
            false
        )
        .unwrap());
    }

    struct Recorder {
        events: Mutex<Vec<(ChangeAction, TxStatus)>>,
    }

    impl WalletObserver for Recorder {
        fn on_transaction_changed(&self, action: ChangeAction, items: &[TxDescription]) {
            self.events
                .lock()
                .unwrap()
                .push((action, items[0].status));
        }
    }

    #[test]
    fn observable_parameters_notify_in_persistence_order() {
        let store = MemoryStore::new(sha256(b"observe"));
        let tx_id = generate_tx_id();
        store.save_tx(&pending_desc(tx_id));

        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let observer: Arc<dyn WalletObserver> = recorder.clone();
        store.subscribe(&observer);

        set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::Status,
            &TxStatus::InProgress,
            true,
        )
        .unwrap();
        // non-observable: no event
        set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::Offset,
            &Scalar::zero(),
            true,
        )
        .unwrap();
        set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::Status,
            &TxStatus::Completed,
            true,
        )
        .unwrap();

        let events = recorder.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (ChangeAction::Updated, TxStatus::InProgress),
                (ChangeAction::Updated, TxStatus::Completed),
            ]
        );

        // the description materialized the latest status
        assert_eq!(store.get_tx(&tx_id).unwrap().status, TxStatus::Completed);
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let store = MemoryStore::new(sha256(b"weak"));
        let tx_id = generate_tx_id();
        store.save_tx(&pending_desc(tx_id));

        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let observer: Arc<dyn WalletObserver> = recorder.clone();
        store.subscribe(&observer);
        drop(observer);
        drop(recorder);

        // must not panic or call into freed observers
        set_tx_parameter(
            store.as_ref(),
            &tx_id,
            TxParameterId::Status,
            &TxStatus::Failed,
            true,
        )
        .unwrap();
    }

    #[test]
    fn delete_tx_drops_parameters() {
        let store = MemoryStore::new(sha256(b"delete"));
        let tx_id = generate_tx_id();
        store.save_tx(&pending_desc(tx_id));
        set_tx_parameter(store.as_ref(), &tx_id, TxParameterId::Amount, &5u64, false).unwrap();

        store.delete_tx(&tx_id);
        assert!(store.get_tx(&tx_id).is_none());
        assert!(store
            .get_tx_parameter_raw(&tx_id, TxParameterId::Amount)
            .is_none());
    }

    #[test]
    fn legacy_change_status_migrates_on_write() {
        let store = MemoryStore::new(sha256(b"migrate"));
        let mut coin = Coin::new(4, CoinStatus::ChangeV0, KeyType::Change);
        store.store_coin(&mut coin);
        assert_eq!(coin.status, CoinStatus::Incoming);

        let mut read_back = coin.clone();
        assert!(store.find_coin(&mut read_back));
        assert_eq!(read_back.status, CoinStatus::Incoming);
    }

    #[test]
    fn own_addresses_can_be_made_immortal() {
        let store = MemoryStore::new(sha256(b"addr"));
        let own = create_address(store.as_ref());
        assert_ne!(own.own_id, 0);
        assert!(store.get_address(&own.wallet_id).is_some());

        let foreign = WalletAddress {
            wallet_id: WalletId(Scalar::from_u64(5).to_point()),
            own_id: 0,
            duration: 100,
            ..own.clone()
        };
        store.save_address(&foreign);

        store.set_never_expiration_for_all();
        assert_eq!(store.get_address(&own.wallet_id).unwrap().duration, 0);
        assert_eq!(
            store.get_address(&foreign.wallet_id).unwrap().duration,
            100
        );
        assert_eq!(store.get_addresses(true).len(), 1);
        assert_eq!(store.get_addresses(false).len(), 1);
    }
}
