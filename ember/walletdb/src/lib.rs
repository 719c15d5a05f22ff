//! Wallet persistence core for the Ember wallet.
//!
//! A typed, record-oriented overlay on top of the Burrow transactional
//! key-value engine. The crate owns the on-disk record taxonomy and its
//! legacy codec, the batch write/erase/transaction surface, the
//! corruption-tolerant load scan, the selective transaction scan and zap
//! operations, the periodic flush scheduler, the salvage/recovery hooks,
//! and the rolling backup policy. The in-memory wallet is consumed through
//! the narrow [`wallet::WalletState`] surface; the chain, RPC, and UI layers
//! live elsewhere.

pub mod backup;
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod flush;
pub mod loader;
pub mod recover;
pub mod schema;
pub mod types;
pub mod wallet;
pub mod zerocoin;

pub use backup::{auto_backup_wallet, BackupOutcome, BackupSettings};
pub use batch::{WalletBatch, WalletDatabase};
pub use config::WalletDbConfig;
pub use error::WalletDbError;
pub use flush::{maybe_flush_wallets, DatabaseRegistry};
pub use loader::{find_wallet_tx, load_wallet, zap_select_tx, zap_wallet_tx, LoadResult};
pub use recover::{keys_only_filter, recover, verify_database_file, verify_environment};
pub use wallet::{Wallet, WalletState};
