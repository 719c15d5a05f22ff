//! End-to-end persistence scenarios exercised through the public surface.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tempfile::tempdir;

use ember_walletdb::backup::BackupSettings;
use ember_walletdb::codec::{self, Encodable, Writer};
use ember_walletdb::schema::{self, FEATURE_LATEST};
use ember_walletdb::types::{
    BlockLocator, HdChain, KeyMetadata, KeyPoolEntry, MasterKey, PrivKey, PubKey, Transaction,
    TxIn, TxOut, WalletTx,
};
use ember_walletdb::zerocoin::BigNum;
use ember_walletdb::{
    auto_backup_wallet, load_wallet, zap_select_tx, LoadResult, Wallet, WalletDatabase,
};

fn privkey(seed: u8) -> PrivKey {
    PrivKey(vec![seed; 32])
}

fn pubkey(seed: u8) -> PubKey {
    privkey(seed).derive_pubkey().expect("derive pubkey")
}

fn transaction(tag: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prev_txid: [tag; 32],
            prev_index: 0,
            script_sig: vec![tag],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: 10_000,
            script_pubkey: vec![0x51, tag],
        }],
        lock_time: 0,
    }
}

fn open_db(dir: &Path) -> WalletDatabase {
    WalletDatabase::open(dir).expect("open wallet database")
}

#[test]
fn fresh_encrypted_wallet_round_trip() {
    let dir = tempdir().expect("tempdir");
    {
        let db = open_db(dir.path());
        let mut batch = db.batch();
        batch
            .write_master_key(1, &MasterKey::new(vec![0xAA; 48], vec![0x01; 8], 25_000))
            .expect("write master key");
        batch
            .write_crypted_key(&pubkey(1), &[0xCC; 48], &KeyMetadata::new(1_650_000_000))
            .expect("write crypted key");
    }

    let db = open_db(dir.path());
    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::Ok);

    assert!(wallet.master_keys.contains_key(&1));
    assert_eq!(wallet.master_key_max_id, 1);
    assert!(wallet.is_encrypted());
    assert_eq!(wallet.load_crypted_key_calls, 1);
    assert_eq!(wallet.load_key_calls, 0);
    assert_eq!(wallet.crypted_keys[&pubkey(1)], vec![0xCC; 48]);
}

#[test]
fn duplicate_master_key_id_is_corrupt() {
    let dir = tempdir().expect("tempdir");
    let db = open_db(dir.path());
    let mut batch = db.batch();

    let value = codec::encode(&MasterKey::new(vec![1, 2], vec![3, 4], 25_000));
    batch
        .write_ic(&schema::mkey_key(1), &value, true)
        .expect("first master key");
    // A salvaged file can carry a second record whose key decodes to the
    // same id; the loader must reject it.
    let mut duplicate_key = schema::mkey_key(1);
    duplicate_key.push(0xFF);
    batch
        .write_ic(&duplicate_key, &value, true)
        .expect("duplicate master key");

    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::Corrupt);
}

#[test]
fn bad_transaction_record_is_tolerated() {
    let dir = tempdir().expect("tempdir");
    let db = open_db(dir.path());
    let mut batch = db.batch();

    batch
        .write_key(&pubkey(2), &privkey(2), &KeyMetadata::new(1_650_000_000))
        .expect("write key");

    // A transaction with no inputs fails the consensus check.
    let mut invalid = transaction(3);
    invalid.inputs.clear();
    let wtx = WalletTx::new(invalid);
    batch
        .write_ic(&schema::tx_key(&wtx.tx.txid()), &codec::encode(&wtx), true)
        .expect("bad tx record");

    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::NonCriticalError);
    assert!(wallet.rescan_requested);
    assert!(wallet.keys.contains_key(&pubkey(2)));
    assert!(wallet.txs.is_empty());
}

#[test]
fn too_new_file_dispatches_nothing() {
    let dir = tempdir().expect("tempdir");
    let db = open_db(dir.path());
    let mut batch = db.batch();
    batch
        .write_min_version(FEATURE_LATEST + 1)
        .expect("write min version");
    batch.write_name("emb1qaddr", "label").expect("write name");

    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::TooNew);
    assert!(wallet.address_book.is_empty());
    assert_eq!(wallet.min_version, 0);
}

#[test]
fn zap_select_tx_erases_exactly_the_selection() {
    let dir = tempdir().expect("tempdir");
    let db = open_db(dir.path());
    let mut batch = db.batch();

    let mut hashes = Vec::new();
    for seed in 0..10u8 {
        let mut wtx = WalletTx::new(transaction(seed));
        wtx.set_order_pos(i64::from(seed));
        batch.write_tx(&wtx).expect("write tx");
        hashes.push(wtx.tx.txid());
    }

    let selection = vec![hashes[2], hashes[5], hashes[9]];
    let erased = zap_select_tx(&db, &selection).expect("zap");
    let erased: BTreeSet<_> = erased.into_iter().collect();
    let expected: BTreeSet<_> = selection.iter().copied().collect();
    assert_eq!(erased, expected);

    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::Ok);
    let remaining: BTreeSet<_> = wallet.txs.keys().copied().collect();
    let kept: BTreeSet<_> = hashes
        .iter()
        .copied()
        .filter(|hash| !expected.contains(hash))
        .collect();
    assert_eq!(remaining, kept);
}

#[test]
fn backup_retention_keeps_three_newest() {
    let dir = tempdir().expect("tempdir");
    let wallet_file = dir.path().join("burrow.wal");
    fs::write(&wallet_file, b"wallet-bytes").expect("wallet file");
    let mut settings = BackupSettings {
        count: 3,
        dir: dir.path().join("backups"),
    };
    fs::create_dir_all(&settings.dir).expect("backup dir");

    // Five earlier backups with distinct minute stamps.
    let mut older = Vec::new();
    for minute in 10..15u64 {
        let path = settings
            .dir
            .join(format!("burrow.wal.2026-08-01-09-{minute}"));
        fs::write(&path, b"old-backup").expect("old backup");
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + minute * 60);
        fs::File::options()
            .write(true)
            .open(&path)
            .expect("open")
            .set_modified(mtime)
            .expect("set mtime");
        older.push(path);
    }

    let outcome = auto_backup_wallet::<Wallet>(None, &wallet_file, &mut settings)
        .expect("sixth backup");
    let created = outcome.file.expect("new backup file");

    let survivors: Vec<_> = fs::read_dir(&settings.dir)
        .expect("read dir")
        .flatten()
        .map(|entry| entry.path())
        .collect();
    assert_eq!(survivors.len(), 3);
    assert!(created.exists());
    // The two newest of the pre-existing backups survive with it.
    assert!(older[4].exists());
    assert!(older[3].exists());
    assert!(!older[0].exists() && !older[1].exists() && !older[2].exists());
}

#[test]
fn persisted_state_round_trips_into_a_fresh_wallet() {
    let dir = tempdir().expect("tempdir");
    {
        let db = open_db(dir.path());
        let mut batch = db.batch();

        batch
            .write_key(&pubkey(7), &privkey(7), &KeyMetadata::new(1_600_000_000))
            .expect("key");
        batch.write_name("emb1qalice", "alice").expect("name");
        batch
            .write_purpose("emb1qalice", "receive")
            .expect("purpose");
        batch
            .write_dest_data("emb1qalice", "memo", "rent")
            .expect("dest data");
        batch
            .write_pool(3, &KeyPoolEntry::new(1_650_000_000, pubkey(8), false))
            .expect("pool");
        batch.write_hd_chain(&HdChain::new([4u8; 20])).expect("hd");
        batch
            .write_wallet_flags(schema::WALLET_FLAG_AVOID_REUSE)
            .expect("flags");
        batch.write_order_pos_next(11).expect("order pos");
        batch
            .write_watch_only(b"\x00\x14watch", &KeyMetadata::new(1_640_000_000))
            .expect("watch only");
        batch.write_cscript(b"\x52\x53").expect("cscript");
        batch
            .write_best_block(&BlockLocator {
                have: vec![[9u8; 32]],
            })
            .expect("best block");

        let mut wtx = WalletTx::new(transaction(9));
        wtx.set_order_pos(0);
        wtx.time_received = 1_660_000_000;
        batch.write_tx(&wtx).expect("tx");
    }

    let db = open_db(dir.path());
    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::Ok);

    assert_eq!(wallet.keys.len(), 1);
    assert!(wallet.keys.contains_key(&pubkey(7)));
    assert_eq!(wallet.load_key_calls, 1);
    assert_eq!(wallet.address_book["emb1qalice"].name, "alice");
    assert_eq!(wallet.address_book["emb1qalice"].purpose, "receive");
    assert_eq!(
        wallet.dest_data[&("emb1qalice".to_string(), "memo".to_string())],
        "rent"
    );
    assert_eq!(wallet.key_pool[&3].pubkey, pubkey(8));
    assert_eq!(wallet.hd_chain.as_ref().expect("hd chain").seed_id, [4u8; 20]);
    assert_eq!(wallet.flags, schema::WALLET_FLAG_AVOID_REUSE);
    assert_eq!(wallet.order_pos_next, 11);
    assert!(wallet.watch_only.contains(b"\x00\x14watch".as_slice()));
    assert_eq!(wallet.cscripts.len(), 1);
    assert_eq!(wallet.txs.len(), 1);

    // The locator reads back through the batch facade.
    let batch = db.batch();
    assert_eq!(
        batch.read_best_block().expect("read best block"),
        Some(BlockLocator {
            have: vec![[9u8; 32]],
        })
    );
}

#[test]
fn unknown_extension_records_are_tolerated() {
    let dir = tempdir().expect("tempdir");
    let db = open_db(dir.path());
    let mut batch = db.batch();

    let mut key = Writer::new();
    key.put_str("acentry");
    key.put_str("legacy-account");
    batch
        .write_ic(&key.into_bytes(), b"ignored", true)
        .expect("acentry record");

    let mut future = Writer::new();
    future.put_str("shardstate");
    BigNum::from_u64(99).encode(&mut future);
    batch
        .write_ic(&future.into_bytes(), b"opaque", true)
        .expect("unknown record");

    let mut wallet = Wallet::new();
    assert_eq!(load_wallet(&db, &mut wallet), LoadResult::Ok);
}
