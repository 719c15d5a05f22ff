//! Full-database scan: record dispatch, corruption classification, and the
//! post-scan repairs, plus the cursor-based transaction scan and zap
//! operations that bypass the validation pipeline.

use tracing::{info, warn};

use crate::batch::WalletDatabase;
use crate::codec::{Decodable, Reader};
use crate::schema::{self, RecordKind, CLIENT_VERSION, FEATURE_LATEST};
use crate::types::{
    integrity_hash, script_id, HdChain, KeyMetadata, KeyPoolEntry, LegacyWalletKey, MasterKey,
    PrivKey, PubKey, TxId, WalletTx,
};
use crate::wallet::WalletState;
use crate::zerocoin::{BigNum, ZerocoinEntry, ZerocoinSpendEntry};

/// Outcome of loading a wallet database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadResult {
    /// Every record loaded cleanly.
    Ok,
    /// The load succeeded but at least one record warned.
    NonCriticalError,
    /// The file was written by a newer implementation, or carries unknown
    /// required flags.
    TooNew,
    /// At least one key-bearing record failed.
    Corrupt,
    /// Legacy encrypted format: the caller must rewrite the database.
    NeedRewrite,
    /// Unspecified failure from the KV engine.
    LoadFail,
}

impl LoadResult {
    fn severity(self) -> u8 {
        match self {
            LoadResult::Ok => 0,
            LoadResult::NonCriticalError => 1,
            LoadResult::NeedRewrite => 2,
            LoadResult::LoadFail => 3,
            LoadResult::TooNew => 4,
            LoadResult::Corrupt => 5,
        }
    }

    /// Keep the most severe classification observed.
    fn escalate(&mut self, other: LoadResult) {
        if other.severity() > self.severity() {
            *self = other;
        }
    }
}

/// First wallet version band affected by the serialization change undone at
/// load time.
const UPGRADE_BAND_START: u32 = 31404;
/// Last affected version, inclusive.
const UPGRADE_BAND_END: u32 = 31703;

/// Legacy writer version remapped on read.
const FILE_VERSION_QUIRK: i32 = 10300;
const FILE_VERSION_QUIRK_MAPPED: i32 = 300;

/// Encrypted files stamped with these writer versions must be rewritten.
const REWRITE_VERSIONS: [i32; 2] = [40000, 50000];

#[derive(Default)]
pub(crate) struct ScanState {
    pub n_keys: u32,
    pub n_ckeys: u32,
    pub n_watch_keys: u32,
    pub n_key_meta: u32,
    pub unknown_records: u32,
    pub is_encrypted: bool,
    pub any_unordered: bool,
    pub file_version: i32,
    pub wallet_upgrades: Vec<TxId>,
}

pub(crate) enum RecordOutcome {
    /// Handled (or deliberately skipped / counted unknown).
    Ok(Option<RecordKind>),
    /// The record failed to decode or validate.
    Failed {
        kind: Option<RecordKind>,
        error: String,
    },
}

fn fail(kind: RecordKind, error: impl Into<String>) -> RecordOutcome {
    RecordOutcome::Failed {
        kind: Some(kind),
        error: error.into(),
    }
}

/// Decode and dispatch a single record into the wallet.
///
/// The caller holds the wallet exclusively for the whole scan; per-record
/// failures are reported, never panicked, so the scan can continue.
pub(crate) fn read_key_value<W: WalletState>(
    wallet: &mut W,
    key: &[u8],
    value: &[u8],
    state: &mut ScanState,
) -> RecordOutcome {
    let mut key_reader = Reader::new(key);
    let tag = match key_reader.get_str() {
        Ok(tag) => tag,
        Err(err) => {
            return RecordOutcome::Failed {
                kind: None,
                error: format!("record tag unreadable: {err}"),
            }
        }
    };
    let Some(kind) = RecordKind::from_tag(&tag) else {
        state.unknown_records += 1;
        return RecordOutcome::Ok(None);
    };

    let mut value_reader = Reader::new(value);
    let result = match kind {
        RecordKind::Name => (|| {
            let address = key_reader.get_str()?;
            let name = value_reader.get_str()?;
            wallet.set_address_book_name(address, name);
            Ok(())
        })(),
        RecordKind::Purpose => (|| {
            let address = key_reader.get_str()?;
            let purpose = value_reader.get_str()?;
            wallet.set_address_book_purpose(address, purpose);
            Ok(())
        })(),
        RecordKind::Tx => {
            return load_tx_record(wallet, &mut key_reader, &mut value_reader, state)
        }
        RecordKind::WatchScript => {
            state.n_watch_keys += 1;
            (|| {
                let script = key_reader.get_bytes()?;
                let flag = value_reader.get_u8()?;
                if flag == b'1' {
                    wallet.load_watch_only(script);
                }
                Ok(())
            })()
        }
        RecordKind::Key | RecordKind::WalletKey => {
            return load_key_record(wallet, kind, &mut key_reader, &mut value_reader, state)
        }
        RecordKind::MasterKey => {
            return load_master_key_record(wallet, &mut key_reader, &mut value_reader)
        }
        RecordKind::CryptedKey => {
            return load_crypted_key_record(wallet, &mut key_reader, &mut value_reader, state)
        }
        RecordKind::KeyMeta => (|| {
            let pubkey = PubKey::decode(&mut key_reader)?;
            let meta = KeyMetadata::decode(&mut value_reader)?;
            state.n_key_meta += 1;
            wallet.load_key_metadata(pubkey.key_id(), meta);
            Ok(())
        })(),
        RecordKind::WatchMeta => (|| {
            let script = key_reader.get_bytes()?;
            let meta = KeyMetadata::decode(&mut value_reader)?;
            state.n_key_meta += 1;
            wallet.load_script_metadata(script_id(&script), meta);
            Ok(())
        })(),
        RecordKind::DefaultKey => {
            // The default key is unused, but a corrupt one must still be
            // detected.
            match PubKey::decode(&mut value_reader) {
                Ok(pubkey) if pubkey.is_valid() => Ok(()),
                _ => return fail(kind, "default key corrupt"),
            }
        }
        RecordKind::Pool => (|| {
            let index = key_reader.get_i64()?;
            let entry = KeyPoolEntry::decode(&mut value_reader)?;
            wallet.load_key_pool(index, entry);
            Ok(())
        })(),
        RecordKind::Version => (|| {
            let mut version = value_reader.get_i32()?;
            if version == FILE_VERSION_QUIRK {
                version = FILE_VERSION_QUIRK_MAPPED;
            }
            state.file_version = version;
            Ok(())
        })(),
        RecordKind::CScript => {
            (|| {
                let _script_id = key_reader.get_raw(20)?;
                let script = value_reader.get_bytes()?;
                if !wallet.load_cscript(script) {
                    return Err(crate::codec::CodecError::Malformed("redeem script"));
                }
                Ok(())
            })()
        }
        RecordKind::OrderPosNext => (|| {
            let order_pos = value_reader.get_i64()?;
            wallet.set_order_pos_next(order_pos);
            Ok(())
        })(),
        RecordKind::DestData => (|| {
            let address = key_reader.get_str()?;
            let entry = key_reader.get_str()?;
            let value = value_reader.get_str()?;
            wallet.load_dest_data(address, entry, value);
            Ok(())
        })(),
        RecordKind::HdChain => (|| {
            let chain = HdChain::decode(&mut value_reader)?;
            wallet.set_hd_chain(chain);
            Ok(())
        })(),
        RecordKind::Flags => match value_reader.get_u64() {
            Ok(flags) => {
                if !wallet.set_wallet_flags(flags) {
                    return fail(kind, "unknown non-tolerable wallet flags found");
                }
                Ok(())
            }
            Err(err) => return fail(kind, err.to_string()),
        },
        // Handled before the scan, or deliberately ignored.
        RecordKind::BestBlock
        | RecordKind::BestBlockNoMerkle
        | RecordKind::MinVersion
        | RecordKind::AccountingEntry => Ok(()),
        // Extension records: validated here, read back through the typed
        // batch surface.
        RecordKind::Zerocoin | RecordKind::UnloadedZerocoin => (|| {
            BigNum::decode(&mut key_reader)?;
            ZerocoinEntry::decode(&mut value_reader)?;
            Ok(())
        })(),
        RecordKind::ZerocoinSerial => (|| {
            BigNum::decode(&mut key_reader)?;
            ZerocoinSpendEntry::decode(&mut value_reader)?;
            Ok(())
        })(),
        RecordKind::ZerocoinAccumulator => (|| {
            key_reader.get_u32()?;
            key_reader.get_i32()?;
            BigNum::decode(&mut value_reader)?;
            Ok(())
        })(),
        RecordKind::CalculatedZcBlock => (|| {
            value_reader.get_i32()?;
            Ok(())
        })(),
    };

    match result {
        Ok(()) => RecordOutcome::Ok(Some(kind)),
        Err(err) => fail(kind, err.to_string()),
    }
}

fn load_tx_record<W: WalletState>(
    wallet: &mut W,
    key_reader: &mut Reader<'_>,
    value_reader: &mut Reader<'_>,
    state: &mut ScanState,
) -> RecordOutcome {
    let kind = RecordKind::Tx;
    let hash = match key_reader.get_hash() {
        Ok(hash) => hash,
        Err(err) => return fail(kind, err.to_string()),
    };
    let mut wtx = match WalletTx::decode(value_reader) {
        Ok(wtx) => wtx,
        Err(err) => return fail(kind, err.to_string()),
    };
    if let Err(err) = wtx.tx.check() {
        return fail(kind, err.to_string());
    }
    if wtx.tx.txid() != hash {
        return fail(kind, "transaction hash does not match its record key");
    }

    // Undo the serialization change shipped in the 31600-era writers.
    if (UPGRADE_BAND_START..=UPGRADE_BAND_END).contains(&wtx.time_received_is_tx_time) {
        if !value_reader.is_empty() {
            let repaired = (|| {
                let f_tmp = value_reader.get_u8()?;
                let _f_unused = value_reader.get_u8()?;
                let _unused = value_reader.get_str()?;
                Ok::<u8, crate::codec::CodecError>(f_tmp)
            })();
            match repaired {
                Ok(f_tmp) => {
                    warn!(
                        ver = wtx.time_received_is_tx_time,
                        repaired = f_tmp,
                        txid = %hex::encode(hash),
                        "upgrading transaction record"
                    );
                    wtx.time_received_is_tx_time = u32::from(f_tmp);
                }
                Err(err) => return fail(kind, err.to_string()),
            }
        } else {
            warn!(
                ver = wtx.time_received_is_tx_time,
                txid = %hex::encode(hash),
                "repairing transaction record"
            );
            wtx.time_received_is_tx_time = 0;
        }
        state.wallet_upgrades.push(hash);
    }

    if wtx.order_pos() == -1 {
        state.any_unordered = true;
    }

    wallet.load_to_wallet(wtx);
    RecordOutcome::Ok(Some(kind))
}

fn load_key_record<W: WalletState>(
    wallet: &mut W,
    kind: RecordKind,
    key_reader: &mut Reader<'_>,
    value_reader: &mut Reader<'_>,
    state: &mut ScanState,
) -> RecordOutcome {
    let pubkey = match PubKey::decode(key_reader) {
        Ok(pubkey) => pubkey,
        Err(err) => return fail(kind, err.to_string()),
    };
    if !pubkey.is_valid() {
        return fail(kind, "public key corrupt");
    }

    let privkey = if kind == RecordKind::Key {
        state.n_keys += 1;
        match PrivKey::decode(value_reader) {
            Ok(privkey) => privkey,
            Err(err) => return fail(kind, err.to_string()),
        }
    } else {
        match LegacyWalletKey::decode(value_reader) {
            Ok(wkey) => wkey.priv_key,
            Err(err) => return fail(kind, err.to_string()),
        }
    };

    // Recent formats append a hash of pubkey/privkey so the load can skip
    // the elliptic-curve re-derivation; its absence is not an error.
    let stored_hash = value_reader.get_hash().ok().filter(|hash| hash != &[0u8; 32]);

    match stored_hash {
        Some(hash) => {
            if integrity_hash(&pubkey, &privkey) != hash {
                return fail(kind, "public key / private key corrupt");
            }
        }
        None => {
            if privkey.derive_pubkey() != Some(pubkey) {
                return fail(kind, "private key corrupt");
            }
        }
    }

    if !wallet.load_key(pubkey, privkey) {
        return fail(kind, "LoadKey failed");
    }
    RecordOutcome::Ok(Some(kind))
}

fn load_master_key_record<W: WalletState>(
    wallet: &mut W,
    key_reader: &mut Reader<'_>,
    value_reader: &mut Reader<'_>,
) -> RecordOutcome {
    let kind = RecordKind::MasterKey;
    let id = match key_reader.get_u32() {
        Ok(id) => id,
        Err(err) => return fail(kind, err.to_string()),
    };
    let master_key = match MasterKey::decode(value_reader) {
        Ok(master_key) => master_key,
        Err(err) => return fail(kind, err.to_string()),
    };
    if wallet.has_master_key(id) {
        return fail(kind, format!("duplicate master key id {id}"));
    }
    wallet.load_master_key(id, master_key);
    RecordOutcome::Ok(Some(kind))
}

fn load_crypted_key_record<W: WalletState>(
    wallet: &mut W,
    key_reader: &mut Reader<'_>,
    value_reader: &mut Reader<'_>,
    state: &mut ScanState,
) -> RecordOutcome {
    let kind = RecordKind::CryptedKey;
    let pubkey = match PubKey::decode(key_reader) {
        Ok(pubkey) => pubkey,
        Err(err) => return fail(kind, err.to_string()),
    };
    if !pubkey.is_valid() {
        return fail(kind, "public key corrupt");
    }
    let secret = match value_reader.get_bytes() {
        Ok(secret) => secret,
        Err(err) => return fail(kind, err.to_string()),
    };
    state.n_ckeys += 1;
    if !wallet.load_crypted_key(pubkey, secret) {
        return fail(kind, "LoadCryptedKey failed");
    }
    state.is_encrypted = true;
    RecordOutcome::Ok(Some(kind))
}

/// Load the whole database into `wallet`.
///
/// The exclusive borrow on the wallet is held for the full scan; per-record
/// failures are classified and the scan continues, so a single bad record
/// never hides the rest of the file.
pub fn load_wallet<W: WalletState>(db: &WalletDatabase, wallet: &mut W) -> LoadResult {
    let mut state = ScanState::default();
    let mut noncritical = false;
    let mut result = LoadResult::Ok;

    {
        let batch = db.batch();
        match batch.read_min_version() {
            Ok(Some(min_version)) => {
                if min_version > FEATURE_LATEST {
                    return LoadResult::TooNew;
                }
                wallet.load_min_version(min_version);
            }
            Ok(None) => {}
            Err(_) => return LoadResult::Corrupt,
        }
    }

    {
        let engine = db.engine();
        for (key, value) in engine.cursor() {
            match read_key_value(wallet, key, value, &mut state) {
                RecordOutcome::Ok(_) => {}
                RecordOutcome::Failed { kind, error } => {
                    // Losing keys is catastrophic; for anything else assume
                    // the user can live with the loss and keep scanning.
                    warn!(tag = kind.map(RecordKind::tag), error = %error, "wallet record failed");
                    match kind {
                        None => result.escalate(LoadResult::Corrupt),
                        Some(k) if k.is_key_bearing() => result.escalate(LoadResult::Corrupt),
                        Some(RecordKind::Flags) => result.escalate(LoadResult::TooNew),
                        Some(RecordKind::Tx) => {
                            noncritical = true;
                            wallet.request_rescan();
                        }
                        Some(_) => noncritical = true,
                    }
                }
            }
        }
    }

    if noncritical && result == LoadResult::Ok {
        result = LoadResult::NonCriticalError;
    }

    wallet.set_file_version(state.file_version);

    // Any corruption at all: skip rewriting or upgrading so nothing is made
    // worse.
    if result != LoadResult::Ok {
        return result;
    }

    info!(file_version = state.file_version, "wallet file version");
    info!(
        plaintext = state.n_keys,
        encrypted = state.n_ckeys,
        with_metadata = state.n_key_meta,
        total = state.n_keys + state.n_ckeys,
        unknown = state.unknown_records,
        "wallet keys loaded"
    );

    // The first-key timestamp is only reliable when every key has metadata.
    if state.n_keys + state.n_ckeys + state.n_watch_keys != state.n_key_meta {
        wallet.update_time_first_key(1);
    }

    let mut batch = db.batch();
    for hash in &state.wallet_upgrades {
        if let Some(wtx) = wallet.wallet_tx(hash) {
            let wtx = wtx.clone();
            if batch.write_tx(&wtx).is_err() {
                result.escalate(LoadResult::Corrupt);
                return result;
            }
        }
    }

    // Encrypted wallets written by the 0.4.0 / 0.5.0rc era must be rebuilt.
    if state.is_encrypted && REWRITE_VERSIONS.contains(&state.file_version) {
        return LoadResult::NeedRewrite;
    }

    if state.file_version < CLIENT_VERSION && batch.write_version(CLIENT_VERSION).is_err() {
        result.escalate(LoadResult::Corrupt);
        return result;
    }

    if state.any_unordered {
        result = wallet.reorder_transactions();
    }

    result
}

/// Collect every `tx` record without dispatching it into a wallet.
pub fn find_wallet_tx(db: &WalletDatabase) -> Result<Vec<(TxId, WalletTx)>, LoadResult> {
    {
        let batch = db.batch();
        match batch.read_min_version() {
            Ok(Some(min_version)) if min_version > FEATURE_LATEST => {
                return Err(LoadResult::TooNew)
            }
            Ok(_) => {}
            Err(_) => return Err(LoadResult::Corrupt),
        }
    }

    let engine = db.engine();
    let mut found = Vec::new();
    for (key, value) in engine.cursor() {
        let mut key_reader = Reader::new(key);
        let Ok(tag) = key_reader.get_str() else {
            return Err(LoadResult::Corrupt);
        };
        if tag != schema::TAG_TX {
            continue;
        }
        let parsed = key_reader
            .get_hash()
            .and_then(|hash| Ok((hash, WalletTx::decode(&mut Reader::new(value))?)));
        match parsed {
            Ok(entry) => found.push(entry),
            Err(_) => return Err(LoadResult::Corrupt),
        }
    }
    Ok(found)
}

/// Erase every wallet transaction whose hash appears in `hashes`; returns
/// the hashes actually erased.
pub fn zap_select_tx(db: &WalletDatabase, hashes: &[TxId]) -> Result<Vec<TxId>, LoadResult> {
    let mut stored: Vec<TxId> = find_wallet_tx(db)?.into_iter().map(|(hash, _)| hash).collect();
    stored.sort_unstable();
    let mut selected = hashes.to_vec();
    selected.sort_unstable();

    let mut batch = db.batch();
    let mut erased = Vec::new();
    let mut erase_failed = false;
    let mut select_iter = selected.iter().peekable();
    for hash in &stored {
        while select_iter.peek().is_some_and(|next| *next < hash) {
            select_iter.next();
        }
        let Some(next) = select_iter.peek() else {
            break;
        };
        if *next == hash {
            if batch.erase_tx(hash).is_err() {
                warn!(txid = %hex::encode(hash), "transaction found for deletion but erase failed");
                erase_failed = true;
            }
            erased.push(*hash);
        }
    }

    if erase_failed {
        return Err(LoadResult::Corrupt);
    }
    Ok(erased)
}

/// Erase every wallet transaction; returns the erased records.
pub fn zap_wallet_tx(db: &WalletDatabase) -> Result<Vec<WalletTx>, LoadResult> {
    let found = find_wallet_tx(db)?;
    let mut batch = db.batch();
    let mut erased = Vec::with_capacity(found.len());
    for (hash, wtx) in found {
        if batch.erase_tx(&hash).is_err() {
            return Err(LoadResult::Corrupt);
        }
        erased.push(wtx);
    }
    Ok(erased)
}
