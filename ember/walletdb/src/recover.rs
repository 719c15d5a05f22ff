//! Salvage pass for damaged wallet files, plus the verification entrypoints.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use storage_burrow::{BurrowKv, WAL_FILE_NAME};
use tracing::{info, warn};

use crate::batch::WalletDatabase;
use crate::error::WalletDbError;
use crate::loader::{read_key_value, RecordOutcome, ScanState};
use crate::schema::RecordKind;
use crate::wallet::WalletState;

/// Result of a salvage-and-rebuild pass.
#[derive(Debug)]
pub struct RecoverOutcome {
    /// Where the damaged file was moved before the rebuild.
    pub backup_path: PathBuf,
    /// Records written into the rebuilt database.
    pub kept: usize,
    /// Records rejected by the filter.
    pub skipped: usize,
}

/// Salvage everything readable from the database at `directory`, move the
/// damaged file aside, and rebuild a fresh database from the records the
/// filter accepts. Without a filter every salvaged record is kept.
pub fn recover(
    directory: &Path,
    mut filter: Option<&mut dyn FnMut(&[u8], &[u8]) -> bool>,
) -> Result<RecoverOutcome, WalletDbError> {
    let salvaged = BurrowKv::salvage(directory)?;
    info!(records = salvaged.len(), path = %directory.display(), "salvaged wallet records");

    let source = directory.join(WAL_FILE_NAME);
    let backup_path = directory.join(format!(
        "{}.{}.bak",
        WAL_FILE_NAME,
        Utc::now().format("%Y%m%d%H%M%S")
    ));
    fs::rename(&source, &backup_path)?;

    let db = WalletDatabase::open(directory)?;
    let mut batch = db.batch();
    let mut kept = 0usize;
    let mut skipped = 0usize;
    for (key, value) in salvaged {
        let keep = match filter.as_mut() {
            Some(predicate) => predicate(&key, &value),
            None => true,
        };
        if !keep {
            skipped += 1;
            continue;
        }
        batch.write_ic(&key, &value, true)?;
        kept += 1;
    }
    db.flush()?;

    info!(kept, skipped, backup = %backup_path.display(), "wallet recovery finished");
    Ok(RecoverOutcome {
        backup_path,
        kept,
        skipped,
    })
}

/// Recovery predicate keeping only key material and the HD chain.
///
/// Each record is replayed through the loader's per-record handler against a
/// throwaway wallet so that undecodable key records are dropped rather than
/// copied into the rebuilt file.
pub fn keys_only_filter<W: WalletState>(wallet: &mut W, key: &[u8], value: &[u8]) -> bool {
    let mut state = ScanState::default();
    let outcome = read_key_value(wallet, key, value, &mut state);
    let (kind, read_ok, error) = match outcome {
        RecordOutcome::Ok(kind) => (kind, true, String::new()),
        RecordOutcome::Failed { kind, error } => (kind, false, error),
    };

    let wanted = matches!(kind, Some(k) if k.is_key_bearing() || k == RecordKind::HdChain);
    if !wanted {
        return false;
    }
    if !read_ok {
        warn!(tag = kind.map(RecordKind::tag), error = %error, "recovery skipping record");
        return false;
    }
    true
}

/// Check that the directory meant to hold the wallet database is usable.
pub fn verify_environment(directory: &Path) -> Result<(), WalletDbError> {
    fs::create_dir_all(directory)?;
    let probe = directory.join(".burrow-env-probe");
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// Strictly verify the wallet file. A missing file is fine (it will be
/// created on open); a malformed one is reported so the caller can run
/// [`recover`].
pub fn verify_database_file(directory: &Path) -> Result<(), WalletDbError> {
    if !directory.join(WAL_FILE_NAME).exists() {
        return Ok(());
    }
    BurrowKv::verify(directory).map_err(WalletDbError::from)
}
