use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wal::{self, FileWal, WalError, WAL_FILE_NAME};

/// 32-byte hash output used when sealing transaction commits.
pub type Hash = [u8; 32];

/// Binary log record encoded into the WAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Commit { root: Hash },
}

/// Error type reported by the Burrow KV engine.
#[derive(Debug, Error)]
pub enum KvError {
    /// Failure caused by the underlying WAL subsystem.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
    /// Persistence layer failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A no-overwrite write found the key already present.
    #[error("key already exists")]
    KeyExists,
    /// A transaction is already active on this handle.
    #[error("transaction already active")]
    TransactionActive,
    /// Commit or abort was requested without an active transaction.
    #[error("no active transaction")]
    NoTransaction,
}

/// Burrow key-value engine: a sorted in-memory table backed by an
/// append-only log. The log is replayed on open to recover the committed
/// state; an explicit transaction stages mutations in an overlay that is
/// either folded into the table on commit or discarded on abort.
#[derive(Debug)]
pub struct BurrowKv {
    dir: PathBuf,
    wal: FileWal,
    state: BTreeMap<Vec<u8>, Vec<u8>>,
    txn: Option<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl BurrowKv {
    /// Open (or create) a Burrow store located at `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, KvError> {
        let dir = directory.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let wal = FileWal::open(&dir)?;

        let mut kv = BurrowKv {
            dir,
            wal,
            state: BTreeMap::new(),
            txn: None,
        };
        for frame in kv.wal.replay()? {
            let record = bincode::deserialize(&frame).map_err(|_| WalError::Corrupt)?;
            kv.apply(record);
        }
        Ok(kv)
    }

    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Put { key, value } => {
                self.state.insert(key, value);
            }
            LogRecord::Delete { key } => {
                self.state.remove(&key);
            }
            LogRecord::Commit { .. } => {}
        }
    }

    fn log(&self, record: &LogRecord) -> Result<(), KvError> {
        let raw = bincode::serialize(record).map_err(|_| WalError::Corrupt)?;
        self.wal.append(&raw)?;
        Ok(())
    }

    /// Fetch a value by key, observing any active transaction overlay.
    pub fn read(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(overlay) = &self.txn {
            if let Some(staged) = overlay.get(key) {
                return staged.clone();
            }
        }
        self.state.get(key).cloned()
    }

    /// Whether a key is present, observing any active transaction overlay.
    pub fn exists(&self, key: &[u8]) -> bool {
        if let Some(overlay) = &self.txn {
            if let Some(staged) = overlay.get(key) {
                return staged.is_some();
            }
        }
        self.state.contains_key(key)
    }

    /// Store a value. With `overwrite` unset the write fails if the key is
    /// already present. Outside a transaction the mutation is logged
    /// immediately; inside one it is staged until commit.
    pub fn write(&mut self, key: &[u8], value: &[u8], overwrite: bool) -> Result<(), KvError> {
        if !overwrite && self.exists(key) {
            return Err(KvError::KeyExists);
        }
        if let Some(overlay) = &mut self.txn {
            overlay.insert(key.to_vec(), Some(value.to_vec()));
            return Ok(());
        }
        self.log(&LogRecord::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.state.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Remove a key. Erasing an absent key succeeds.
    pub fn erase(&mut self, key: &[u8]) -> Result<(), KvError> {
        if let Some(overlay) = &mut self.txn {
            overlay.insert(key.to_vec(), None);
            return Ok(());
        }
        if self.state.contains_key(key) {
            self.log(&LogRecord::Delete { key: key.to_vec() })?;
            self.state.remove(key);
        }
        Ok(())
    }

    /// Begin a transaction. Only one may be active per handle.
    pub fn txn_begin(&mut self) -> Result<(), KvError> {
        if self.txn.is_some() {
            return Err(KvError::TransactionActive);
        }
        self.txn = Some(BTreeMap::new());
        Ok(())
    }

    /// Fold the active transaction into the committed state.
    pub fn txn_commit(&mut self) -> Result<(), KvError> {
        let overlay = self.txn.take().ok_or(KvError::NoTransaction)?;
        for (key, staged) in &overlay {
            let record = match staged {
                Some(value) => LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                },
                None => LogRecord::Delete { key: key.clone() },
            };
            self.log(&record)?;
        }
        for (key, staged) in overlay {
            match staged {
                Some(value) => {
                    self.state.insert(key, value);
                }
                None => {
                    self.state.remove(&key);
                }
            }
        }
        let root = self.root_hash();
        self.log(&LogRecord::Commit { root })?;
        Ok(())
    }

    /// Discard the active transaction, restoring the pre-transaction view.
    pub fn txn_abort(&mut self) -> Result<(), KvError> {
        if self.txn.take().is_none() {
            return Err(KvError::NoTransaction);
        }
        Ok(())
    }

    /// Whether a transaction is currently active on this handle.
    pub fn txn_active(&self) -> bool {
        self.txn.is_some()
    }

    /// Iterate the committed state in key order.
    pub fn cursor(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.state
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    /// Iterate committed entries whose key starts with `prefix`, in order.
    pub fn scan_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.state
            .range(prefix.to_vec()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Whether the committed state holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Durably sync the log, then compact it down to a snapshot of the
    /// committed state. The periodic-flush entry point for schedulers.
    pub fn flush(&mut self) -> Result<(), KvError> {
        self.wal.sync()?;
        let mut frames = Vec::with_capacity(self.state.len() + 1);
        for (key, value) in &self.state {
            let record = LogRecord::Put {
                key: key.clone(),
                value: value.clone(),
            };
            frames.push(bincode::serialize(&record).map_err(|_| WalError::Corrupt)?);
        }
        let root = self.root_hash();
        frames.push(bincode::serialize(&LogRecord::Commit { root }).map_err(|_| WalError::Corrupt)?);
        self.wal.rewrite(frames)?;
        self.wal.sync()?;
        Ok(())
    }

    /// Hash of the committed state, sealed into commit frames.
    pub fn root_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in &self.state {
            hasher.update(&(key.len() as u32).to_le_bytes());
            hasher.update(key);
            hasher.update(&(value.len() as u32).to_le_bytes());
            hasher.update(value);
        }
        hasher.finalize().into()
    }

    /// Directory this store lives in.
    pub fn base_dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the backing log file.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(WAL_FILE_NAME)
    }

    /// Extract every (key, value) pair readable from a possibly corrupted
    /// store without opening it. Intact frames up to the first malformed one
    /// are applied in order; the resulting table is returned.
    pub fn salvage<P: AsRef<Path>>(directory: P) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let path = directory.as_ref().join(WAL_FILE_NAME);
        let mut table: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for frame in wal::read_frames(&path, false)? {
            let Ok(record) = bincode::deserialize::<LogRecord>(&frame) else {
                break;
            };
            match record {
                LogRecord::Put { key, value } => {
                    table.insert(key, value);
                }
                LogRecord::Delete { key } => {
                    table.remove(&key);
                }
                LogRecord::Commit { .. } => {}
            }
        }
        Ok(table.into_iter().collect())
    }

    /// Strictly replay the store at `directory`, failing on any malformed
    /// frame. Nothing is mutated.
    pub fn verify<P: AsRef<Path>>(directory: P) -> Result<(), KvError> {
        let path = directory.as_ref().join(WAL_FILE_NAME);
        for frame in wal::read_frames(&path, true)? {
            bincode::deserialize::<LogRecord>(&frame).map_err(|_| WalError::Corrupt)?;
        }
        Ok(())
    }
}
