use thiserror::Error;

use storage_burrow::KvError;

use crate::codec::CodecError;

/// Error surfaced by the typed batch surface and its callers.
#[derive(Debug, Error)]
pub enum WalletDbError {
    /// Failure reported by the underlying KV engine.
    #[error("storage engine error: {0}")]
    Kv(#[from] KvError),
    /// File-level failure outside the engine (salvage backups, probes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record failed to encode or decode.
    #[error("record codec error: {0}")]
    Codec(#[from] CodecError),
    /// A no-overwrite write found its key already present.
    #[error("record already exists")]
    KeyExists,
    /// New plaintext keys are refused once the wallet holds encrypted keys.
    #[error("wallet is encrypted; plaintext key writes are disallowed")]
    WalletAlreadyEncrypted,
}

impl WalletDbError {
    pub(crate) fn from_kv(error: KvError) -> Self {
        match error {
            KvError::KeyExists => WalletDbError::KeyExists,
            other => WalletDbError::Kv(other),
        }
    }
}
