//! Typed batch facade over the KV engine.
//!
//! Every mutating call funnels through [`WalletBatch::write_ic`] or
//! [`WalletBatch::erase_ic`], which bump the owning database's update
//! counter on success. Compound key writes run inside a KV transaction so a
//! crash can never leave metadata visible without its key.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use storage_burrow::BurrowKv;
use tracing::debug;

use crate::codec::{self, Encodable, Reader, Writer};
use crate::error::WalletDbError;
use crate::schema::{
    self, TAG_BESTBLOCK, TAG_BESTBLOCK_NOMERKLE, TAG_CKEY, TAG_FLAGS, TAG_HDCHAIN,
    TAG_MINVERSION, TAG_ORDERPOSNEXT, TAG_VERSION,
};
use crate::types::{
    integrity_hash, script_id, BlockLocator, HdChain, KeyMetadata, KeyPoolEntry, MasterKey,
    PrivKey, PubKey, TxId, WalletTx,
};

/// An open wallet database: the engine handle plus the bookkeeping observed
/// by the flush scheduler.
pub struct WalletDatabase {
    engine: Mutex<BurrowKv>,
    update_counter: AtomicU64,
    last_seen: AtomicU64,
    last_flushed: AtomicU64,
    last_update_time: AtomicU64,
}

impl WalletDatabase {
    /// Open or create the wallet database rooted at `directory`.
    pub fn open<P: Into<PathBuf>>(directory: P) -> Result<Self, WalletDbError> {
        let engine = BurrowKv::open(directory.into())?;
        Ok(Self {
            engine: Mutex::new(engine),
            update_counter: AtomicU64::new(0),
            last_seen: AtomicU64::new(0),
            last_flushed: AtomicU64::new(0),
            last_update_time: AtomicU64::new(0),
        })
    }

    /// Start a typed batch against this database.
    pub fn batch(&self) -> WalletBatch<'_> {
        WalletBatch { db: self }
    }

    /// Monotonic count of successful mutations, observed lock-free.
    pub fn update_counter(&self) -> u64 {
        self.update_counter.load(Ordering::Relaxed)
    }

    /// Durably checkpoint the engine. Used by the flush scheduler.
    pub fn flush(&self) -> Result<(), WalletDbError> {
        let mut engine = self.engine.lock();
        engine.flush()?;
        Ok(())
    }

    /// Path of the single file backing this database.
    pub fn file_path(&self) -> PathBuf {
        self.engine.lock().file_path()
    }

    /// Directory this database lives in.
    pub fn base_dir(&self) -> PathBuf {
        self.engine.lock().base_dir().to_path_buf()
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, BurrowKv> {
        self.engine.lock()
    }

    pub(crate) fn bump_update_counter(&self) {
        self.update_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_seen(&self, counter: u64) {
        self.last_seen.store(counter, Ordering::Relaxed);
    }

    pub(crate) fn last_flushed(&self) -> u64 {
        self.last_flushed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_flushed(&self, counter: u64) {
        self.last_flushed.store(counter, Ordering::Relaxed);
    }

    pub(crate) fn last_update_time(&self) -> u64 {
        self.last_update_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_update_time(&self, time: u64) {
        self.last_update_time.store(time, Ordering::Relaxed);
    }
}

/// Typed write/erase/read surface over one database.
pub struct WalletBatch<'a> {
    db: &'a WalletDatabase,
}

impl<'a> WalletBatch<'a> {
    /// Write primitive behind every typed operation: stores `value` under
    /// `key` and bumps the update counter. With `overwrite` unset the write
    /// fails if the key exists. Exposed for recovery tooling that works on
    /// raw records.
    pub fn write_ic(
        &mut self,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<(), WalletDbError> {
        {
            let mut engine = self.db.engine();
            engine
                .write(key, value, overwrite)
                .map_err(WalletDbError::from_kv)?;
        }
        self.db.bump_update_counter();
        Ok(())
    }

    /// Erase primitive: removes `key` (absent keys succeed) and bumps the
    /// update counter.
    pub fn erase_ic(&mut self, key: &[u8]) -> Result<(), WalletDbError> {
        {
            let mut engine = self.db.engine();
            engine.erase(key).map_err(WalletDbError::from_kv)?;
        }
        self.db.bump_update_counter();
        Ok(())
    }

    pub(crate) fn read_raw(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.engine().read(key)
    }

    pub(crate) fn exists(&self, key: &[u8]) -> bool {
        self.db.engine().exists(key)
    }

    pub(crate) fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.db
            .engine()
            .scan_prefix(prefix)
            .map(|(key, value)| (key.to_vec(), value.to_vec()))
            .collect()
    }

    /// Begin a KV transaction. A batch holds at most one.
    pub fn txn_begin(&mut self) -> Result<(), WalletDbError> {
        self.db.engine().txn_begin().map_err(WalletDbError::from_kv)
    }

    pub fn txn_commit(&mut self) -> Result<(), WalletDbError> {
        self.db
            .engine()
            .txn_commit()
            .map_err(WalletDbError::from_kv)
    }

    pub fn txn_abort(&mut self) -> Result<(), WalletDbError> {
        self.db.engine().txn_abort().map_err(WalletDbError::from_kv)
    }

    fn txn_active(&self) -> bool {
        self.db.engine().txn_active()
    }

    /// Run `body` inside a transaction, reusing the caller's if one is
    /// already open.
    fn with_txn<F>(&mut self, body: F) -> Result<(), WalletDbError>
    where
        F: FnOnce(&mut Self) -> Result<(), WalletDbError>,
    {
        if self.txn_active() {
            return body(self);
        }
        self.txn_begin()?;
        match body(self) {
            Ok(()) => self.txn_commit(),
            Err(err) => {
                let _ = self.txn_abort();
                Err(err)
            }
        }
    }

    pub fn write_name(&mut self, address: &str, name: &str) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_str(name);
        self.write_ic(&schema::name_key(address), &writer.into_bytes(), true)
    }

    /// Only sending addresses lose their label; receiving addresses keep an
    /// address-book entry unless they are change.
    pub fn erase_name(&mut self, address: &str) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::name_key(address))
    }

    pub fn write_purpose(&mut self, address: &str, purpose: &str) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_str(purpose);
        self.write_ic(&schema::purpose_key(address), &writer.into_bytes(), true)
    }

    pub fn erase_purpose(&mut self, address: &str) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::purpose_key(address))
    }

    pub fn write_tx(&mut self, wtx: &WalletTx) -> Result<(), WalletDbError> {
        let txid = wtx.tx.txid();
        self.write_ic(&schema::tx_key(&txid), &codec::encode(wtx), true)
    }

    pub fn erase_tx(&mut self, txid: &TxId) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::tx_key(txid))
    }

    /// Persist a plaintext key with its metadata. Both records are written
    /// without overwrite inside one KV transaction, so a partial write can
    /// never surface metadata without its key.
    pub fn write_key(
        &mut self,
        pubkey: &PubKey,
        privkey: &PrivKey,
        meta: &KeyMetadata,
    ) -> Result<(), WalletDbError> {
        if self.store_is_encrypted() {
            return Err(WalletDbError::WalletAlreadyEncrypted);
        }
        self.with_txn(|batch| {
            batch.write_ic(&schema::keymeta_key(pubkey), &codec::encode(meta), false)?;

            // Integrity tag over pubkey/privkey accelerates wallet load.
            let mut writer = Writer::new();
            privkey.encode(&mut writer);
            writer.put_hash(&integrity_hash(pubkey, privkey));
            batch.write_ic(&schema::key_key(pubkey), &writer.into_bytes(), false)
        })
    }

    /// Persist an encrypted key, replacing any plaintext form. Metadata,
    /// ciphertext, and the two erases share one KV transaction.
    pub fn write_crypted_key(
        &mut self,
        pubkey: &PubKey,
        crypted_secret: &[u8],
        meta: &KeyMetadata,
    ) -> Result<(), WalletDbError> {
        self.with_txn(|batch| {
            batch.write_ic(&schema::keymeta_key(pubkey), &codec::encode(meta), true)?;

            let mut writer = Writer::new();
            writer.put_bytes(crypted_secret);
            batch.write_ic(&schema::ckey_key(pubkey), &writer.into_bytes(), false)?;
            batch.erase_ic(&schema::key_key(pubkey))?;
            batch.erase_ic(&schema::wkey_key(pubkey))
        })
    }

    pub fn write_master_key(&mut self, id: u32, key: &MasterKey) -> Result<(), WalletDbError> {
        self.write_ic(&schema::mkey_key(id), &codec::encode(key), true)
    }

    pub fn write_cscript(&mut self, script: &[u8]) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_bytes(script);
        self.write_ic(
            &schema::cscript_key(&script_id(script)),
            &writer.into_bytes(),
            false,
        )
    }

    pub fn write_watch_only(
        &mut self,
        script: &[u8],
        meta: &KeyMetadata,
    ) -> Result<(), WalletDbError> {
        self.write_ic(&schema::watchmeta_key(script), &codec::encode(meta), true)?;
        self.write_ic(&schema::watchs_key(script), b"1", true)
    }

    pub fn erase_watch_only(&mut self, script: &[u8]) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::watchmeta_key(script))?;
        self.erase_ic(&schema::watchs_key(script))
    }

    /// Persist the chain position. The `bestblock` record is always written
    /// with an empty locator so readers that require a merkle branch rescan;
    /// the authoritative locator lives under `bestblock_nomerkle`.
    pub fn write_best_block(&mut self, locator: &BlockLocator) -> Result<(), WalletDbError> {
        self.write_ic(
            &schema::singleton_key(TAG_BESTBLOCK),
            &codec::encode(&BlockLocator::default()),
            true,
        )?;
        self.write_ic(
            &schema::singleton_key(TAG_BESTBLOCK_NOMERKLE),
            &codec::encode(locator),
            true,
        )
    }

    /// A non-empty `bestblock` wins for compatibility with files written by
    /// older implementations; otherwise the no-merkle record is used.
    pub fn read_best_block(&self) -> Result<Option<BlockLocator>, WalletDbError> {
        if let Some(bytes) = self.read_raw(&schema::singleton_key(TAG_BESTBLOCK)) {
            let locator: BlockLocator = codec::decode(&bytes)?;
            if !locator.is_empty() {
                return Ok(Some(locator));
            }
        }
        let Some(bytes) = self.read_raw(&schema::singleton_key(TAG_BESTBLOCK_NOMERKLE)) else {
            return Ok(None);
        };
        Ok(Some(codec::decode(&bytes)?))
    }

    pub fn write_order_pos_next(&mut self, order_pos: i64) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_i64(order_pos);
        self.write_ic(
            &schema::singleton_key(TAG_ORDERPOSNEXT),
            &writer.into_bytes(),
            true,
        )
    }

    pub fn read_pool(&self, index: i64) -> Result<Option<KeyPoolEntry>, WalletDbError> {
        let Some(bytes) = self.read_raw(&schema::pool_key(index)) else {
            return Ok(None);
        };
        Ok(Some(codec::decode(&bytes)?))
    }

    pub fn write_pool(&mut self, index: i64, entry: &KeyPoolEntry) -> Result<(), WalletDbError> {
        self.write_ic(&schema::pool_key(index), &codec::encode(entry), true)
    }

    pub fn erase_pool(&mut self, index: i64) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::pool_key(index))
    }

    pub fn write_min_version(&mut self, version: i32) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_i32(version);
        self.write_ic(
            &schema::singleton_key(TAG_MINVERSION),
            &writer.into_bytes(),
            true,
        )
    }

    pub fn read_min_version(&self) -> Result<Option<i32>, WalletDbError> {
        let Some(bytes) = self.read_raw(&schema::singleton_key(TAG_MINVERSION)) else {
            return Ok(None);
        };
        let mut reader = Reader::new(&bytes);
        Ok(Some(reader.get_i32()?))
    }

    pub fn read_version(&self) -> Result<Option<i32>, WalletDbError> {
        let Some(bytes) = self.read_raw(&schema::singleton_key(TAG_VERSION)) else {
            return Ok(None);
        };
        let mut reader = Reader::new(&bytes);
        Ok(Some(reader.get_i32()?))
    }

    pub fn write_version(&mut self, version: i32) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_i32(version);
        self.write_ic(
            &schema::singleton_key(TAG_VERSION),
            &writer.into_bytes(),
            true,
        )
    }

    pub fn write_dest_data(
        &mut self,
        address: &str,
        entry: &str,
        value: &str,
    ) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_str(value);
        self.write_ic(
            &schema::destdata_key(address, entry),
            &writer.into_bytes(),
            true,
        )
    }

    pub fn erase_dest_data(&mut self, address: &str, entry: &str) -> Result<(), WalletDbError> {
        self.erase_ic(&schema::destdata_key(address, entry))
    }

    pub fn write_hd_chain(&mut self, chain: &HdChain) -> Result<(), WalletDbError> {
        self.write_ic(
            &schema::singleton_key(TAG_HDCHAIN),
            &codec::encode(chain),
            true,
        )
    }

    pub fn write_wallet_flags(&mut self, flags: u64) -> Result<(), WalletDbError> {
        let mut writer = Writer::new();
        writer.put_u64(flags);
        self.write_ic(&schema::singleton_key(TAG_FLAGS), &writer.into_bytes(), true)
    }

    /// Whether the store already holds any encrypted key record.
    fn store_is_encrypted(&self) -> bool {
        let prefix = schema::singleton_key(TAG_CKEY);
        let encrypted = !self.scan_prefix(&prefix).is_empty();
        if encrypted {
            debug!("plaintext key write refused: encrypted key records present");
        }
        encrypted
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::types::tests::{sample_privkey, sample_pubkey, sample_transaction};

    fn open_db(dir: &std::path::Path) -> WalletDatabase {
        WalletDatabase::open(dir).expect("open wallet database")
    }

    #[test]
    fn update_counter_strictly_increases() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();

        let before = db.update_counter();
        batch.write_name("emb1qaddr", "savings").expect("write name");
        let after_write = db.update_counter();
        assert!(after_write > before);

        batch.erase_name("emb1qaddr").expect("erase name");
        assert!(db.update_counter() > after_write);
    }

    #[test]
    fn no_overwrite_write_is_refused() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        batch.write_cscript(b"\x51").expect("first");
        assert!(matches!(
            batch.write_cscript(b"\x51"),
            Err(WalletDbError::KeyExists)
        ));
    }

    #[test]
    fn write_key_is_atomic_with_metadata() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        let pubkey = sample_pubkey(2);
        let privkey = sample_privkey(2);
        let meta = KeyMetadata::new(1_650_000_000);

        batch.write_key(&pubkey, &privkey, &meta).expect("write key");
        // Re-writing the same key fails and must leave no partial state
        // behind: the metadata record was written first in the transaction.
        assert!(batch.write_key(&pubkey, &privkey, &meta).is_err());
        assert!(batch.exists(&schema::key_key(&pubkey)));
        assert!(batch.exists(&schema::keymeta_key(&pubkey)));
    }

    #[test]
    fn write_crypted_key_erases_plaintext_forms() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        let pubkey = sample_pubkey(3);
        let privkey = sample_privkey(3);
        let meta = KeyMetadata::new(1_650_000_000);

        batch.write_key(&pubkey, &privkey, &meta).expect("write key");
        batch
            .write_crypted_key(&pubkey, &[9u8; 48], &meta)
            .expect("write crypted key");

        assert!(!batch.exists(&schema::key_key(&pubkey)));
        assert!(!batch.exists(&schema::wkey_key(&pubkey)));
        assert!(batch.exists(&schema::ckey_key(&pubkey)));

        // Invariant: encrypted stores refuse new plaintext keys.
        let other = sample_pubkey(4);
        assert!(matches!(
            batch.write_key(&other, &sample_privkey(4), &meta),
            Err(WalletDbError::WalletAlreadyEncrypted)
        ));
    }

    #[test]
    fn aborted_transaction_restores_pre_state() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        batch.write_name("emb1qkeep", "kept").expect("write");

        batch.txn_begin().expect("begin");
        batch.write_name("emb1qkeep", "clobbered").expect("staged");
        batch.write_purpose("emb1qkeep", "receive").expect("staged");
        batch.erase_name("emb1qkeep").expect("staged erase");
        batch.txn_abort().expect("abort");

        assert!(batch.exists(&schema::name_key("emb1qkeep")));
        assert!(!batch.exists(&schema::purpose_key("emb1qkeep")));
        let bytes = batch.read_raw(&schema::name_key("emb1qkeep")).expect("raw");
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.get_str().expect("name"), "kept");
    }

    #[test]
    fn nested_txn_begin_fails() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        batch.txn_begin().expect("begin");
        assert!(batch.txn_begin().is_err());
        batch.txn_abort().expect("abort");
    }

    #[test]
    fn best_block_prefers_non_empty_legacy_record() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        let locator = BlockLocator {
            have: vec![[5u8; 32]],
        };
        batch.write_best_block(&locator).expect("write best block");
        // The writer stores an empty legacy record, so the no-merkle locator
        // is returned.
        assert_eq!(batch.read_best_block().expect("read"), Some(locator));

        // A file produced by an older writer carries a non-empty legacy
        // record, which must win.
        let legacy = BlockLocator {
            have: vec![[6u8; 32], [7u8; 32]],
        };
        batch
            .write_ic(
                &schema::singleton_key(TAG_BESTBLOCK),
                &codec::encode(&legacy),
                true,
            )
            .expect("legacy record");
        assert_eq!(batch.read_best_block().expect("read"), Some(legacy));
    }

    #[test]
    fn pool_and_version_round_trip() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        let entry = KeyPoolEntry::new(1_700_000_000, sample_pubkey(6), false);
        batch.write_pool(7, &entry).expect("write pool");
        assert_eq!(batch.read_pool(7).expect("read"), Some(entry));
        batch.erase_pool(7).expect("erase");
        assert_eq!(batch.read_pool(7).expect("read"), None);

        assert_eq!(batch.read_version().expect("read"), None);
        batch.write_version(schema::CLIENT_VERSION).expect("write");
        assert_eq!(
            batch.read_version().expect("read"),
            Some(schema::CLIENT_VERSION)
        );
    }

    #[test]
    fn tx_write_round_trips_through_engine() {
        let dir = tempdir().expect("tempdir");
        let db = open_db(dir.path());
        let mut batch = db.batch();
        let wtx = WalletTx::new(sample_transaction(9));
        let txid = wtx.tx.txid();
        batch.write_tx(&wtx).expect("write tx");
        let bytes = batch.read_raw(&schema::tx_key(&txid)).expect("tx present");
        let decoded: WalletTx = codec::decode(&bytes).expect("decode");
        assert_eq!(decoded, wtx);
        batch.erase_tx(&txid).expect("erase");
        assert!(!batch.exists(&schema::tx_key(&txid)));
    }
}
