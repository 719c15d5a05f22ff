//! The narrow callback surface the loader dispatches into, plus a reference
//! in-memory wallet used by the test suite and the recovery filter.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::loader::LoadResult;
use crate::schema::{KNOWN_WALLET_FLAGS, TOLERABLE_WALLET_FLAGS_MASK};
use crate::types::{
    HdChain, KeyId, KeyMetadata, KeyPoolEntry, MasterKey, PrivKey, PubKey, ScriptId, TxId,
    WalletTx,
};

/// Address-book entry: display name and purpose.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressBookEntry {
    pub name: String,
    pub purpose: String,
}

/// Capability surface the persistence core consumes from the in-memory
/// wallet. The loader takes it by exclusive borrow for the whole scan; that
/// borrow is the lock token.
pub trait WalletState {
    fn load_key(&mut self, pubkey: PubKey, privkey: PrivKey) -> bool;
    fn load_crypted_key(&mut self, pubkey: PubKey, crypted_secret: Vec<u8>) -> bool;
    fn load_key_metadata(&mut self, key_id: KeyId, meta: KeyMetadata);
    fn load_script_metadata(&mut self, script_id: ScriptId, meta: KeyMetadata);
    fn load_cscript(&mut self, script: Vec<u8>) -> bool;
    fn load_watch_only(&mut self, script: Vec<u8>);
    fn load_key_pool(&mut self, index: i64, entry: KeyPoolEntry);
    fn load_to_wallet(&mut self, wtx: WalletTx);
    fn load_dest_data(&mut self, address: String, entry: String, value: String);
    fn set_hd_chain(&mut self, chain: HdChain);
    /// Returns `false` when unknown non-tolerable flag bits are set.
    fn set_wallet_flags(&mut self, flags: u64) -> bool;
    fn load_min_version(&mut self, version: i32);

    fn set_address_book_name(&mut self, address: String, name: String);
    fn set_address_book_purpose(&mut self, address: String, purpose: String);

    fn has_master_key(&self, id: u32) -> bool;
    fn load_master_key(&mut self, id: u32, key: MasterKey);

    fn set_order_pos_next(&mut self, order_pos: i64);
    fn set_file_version(&mut self, version: i32);
    /// Ask the embedding application to rescan the chain on next startup.
    fn request_rescan(&mut self);
    fn update_time_first_key(&mut self, time: i64);
    fn reorder_transactions(&mut self) -> LoadResult;
    fn wallet_tx(&self, txid: &TxId) -> Option<&WalletTx>;

    fn keypool_size(&self) -> usize;
    /// Whether key derivation is currently locked (encrypted and sealed).
    fn is_locked(&self) -> bool;
    fn set_keys_left_since_auto_backup(&mut self, keys_left: usize);
}

/// Reference in-memory wallet.
#[derive(Default)]
pub struct Wallet {
    pub keys: BTreeMap<PubKey, PrivKey>,
    pub crypted_keys: BTreeMap<PubKey, Vec<u8>>,
    pub key_metadata: BTreeMap<KeyId, KeyMetadata>,
    pub script_metadata: BTreeMap<ScriptId, KeyMetadata>,
    pub cscripts: BTreeMap<ScriptId, Vec<u8>>,
    pub watch_only: BTreeSet<Vec<u8>>,
    pub key_pool: BTreeMap<i64, KeyPoolEntry>,
    pub txs: BTreeMap<TxId, WalletTx>,
    pub dest_data: BTreeMap<(String, String), String>,
    pub address_book: BTreeMap<String, AddressBookEntry>,
    pub master_keys: BTreeMap<u32, MasterKey>,
    pub master_key_max_id: u32,
    pub hd_chain: Option<HdChain>,
    pub flags: u64,
    pub min_version: i32,
    pub file_version: i32,
    pub order_pos_next: i64,
    pub time_first_key: i64,
    pub rescan_requested: bool,
    pub locked: bool,
    pub keys_left_since_auto_backup: usize,
    pub load_key_calls: usize,
    pub load_crypted_key_calls: usize,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_encrypted(&self) -> bool {
        !self.crypted_keys.is_empty()
    }
}

impl WalletState for Wallet {
    fn load_key(&mut self, pubkey: PubKey, privkey: PrivKey) -> bool {
        self.load_key_calls += 1;
        self.keys.insert(pubkey, privkey);
        true
    }

    fn load_crypted_key(&mut self, pubkey: PubKey, crypted_secret: Vec<u8>) -> bool {
        self.load_crypted_key_calls += 1;
        self.crypted_keys.insert(pubkey, crypted_secret);
        true
    }

    fn load_key_metadata(&mut self, key_id: KeyId, meta: KeyMetadata) {
        if meta.create_time > 0 && (self.time_first_key == 0 || meta.create_time < self.time_first_key)
        {
            self.time_first_key = meta.create_time;
        }
        self.key_metadata.insert(key_id, meta);
    }

    fn load_script_metadata(&mut self, script_id: ScriptId, meta: KeyMetadata) {
        self.script_metadata.insert(script_id, meta);
    }

    fn load_cscript(&mut self, script: Vec<u8>) -> bool {
        self.cscripts.insert(crate::types::script_id(&script), script);
        true
    }

    fn load_watch_only(&mut self, script: Vec<u8>) {
        self.watch_only.insert(script);
    }

    fn load_key_pool(&mut self, index: i64, entry: KeyPoolEntry) {
        self.key_pool.insert(index, entry);
    }

    fn load_to_wallet(&mut self, wtx: WalletTx) {
        self.txs.insert(wtx.tx.txid(), wtx);
    }

    fn load_dest_data(&mut self, address: String, entry: String, value: String) {
        self.dest_data.insert((address, entry), value);
    }

    fn set_hd_chain(&mut self, chain: HdChain) {
        self.hd_chain = Some(chain);
    }

    fn set_wallet_flags(&mut self, flags: u64) -> bool {
        let unknown = flags & !KNOWN_WALLET_FLAGS;
        if unknown & !TOLERABLE_WALLET_FLAGS_MASK != 0 {
            return false;
        }
        if unknown != 0 {
            warn!("ignoring unknown tolerable wallet flags {unknown:#x}");
        }
        self.flags = flags;
        true
    }

    fn load_min_version(&mut self, version: i32) {
        self.min_version = version;
    }

    fn set_address_book_name(&mut self, address: String, name: String) {
        self.address_book.entry(address).or_default().name = name;
    }

    fn set_address_book_purpose(&mut self, address: String, purpose: String) {
        self.address_book.entry(address).or_default().purpose = purpose;
    }

    fn has_master_key(&self, id: u32) -> bool {
        self.master_keys.contains_key(&id)
    }

    fn load_master_key(&mut self, id: u32, key: MasterKey) {
        self.master_keys.insert(id, key);
        if self.master_key_max_id < id {
            self.master_key_max_id = id;
        }
    }

    fn set_order_pos_next(&mut self, order_pos: i64) {
        self.order_pos_next = order_pos;
    }

    fn set_file_version(&mut self, version: i32) {
        self.file_version = version;
    }

    fn request_rescan(&mut self) {
        self.rescan_requested = true;
    }

    fn update_time_first_key(&mut self, time: i64) {
        self.time_first_key = time;
    }

    fn reorder_transactions(&mut self) -> LoadResult {
        let mut order: Vec<TxId> = self.txs.keys().copied().collect();
        order.sort_by_key(|txid| {
            let wtx = &self.txs[txid];
            (wtx.time_received, *txid)
        });
        for (position, txid) in order.iter().enumerate() {
            if let Some(wtx) = self.txs.get_mut(txid) {
                wtx.set_order_pos(position as i64);
            }
        }
        self.order_pos_next = order.len() as i64;
        LoadResult::Ok
    }

    fn wallet_tx(&self, txid: &TxId) -> Option<&WalletTx> {
        self.txs.get(txid)
    }

    fn keypool_size(&self) -> usize {
        self.key_pool.len()
    }

    fn is_locked(&self) -> bool {
        self.locked
    }

    fn set_keys_left_since_auto_backup(&mut self, keys_left: usize) {
        self.keys_left_since_auto_backup = keys_left;
    }
}
