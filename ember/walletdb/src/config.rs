use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backup::BackupSettings;

const DEFAULT_FLUSH_WALLET: bool = true;
const DEFAULT_WALLET_BACKUPS: i32 = 10;

/// Persistence-layer configuration exposed to the embedding runtime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WalletDbConfig {
    /// Enable the periodic idle-database flush scheduler.
    pub flush_wallet: bool,
    /// Number of rolling backups to retain; zero or less disables backups.
    pub wallet_backups: i32,
    /// Directory storing timestamped wallet backup copies.
    pub backups_dir: PathBuf,
}

impl Default for WalletDbConfig {
    fn default() -> Self {
        Self {
            flush_wallet: DEFAULT_FLUSH_WALLET,
            wallet_backups: DEFAULT_WALLET_BACKUPS,
            backups_dir: PathBuf::from("./data/wallet/backups"),
        }
    }
}

impl WalletDbConfig {
    /// Mutable backup state seeded from this configuration.
    pub fn backup_settings(&self) -> BackupSettings {
        BackupSettings {
            count: self.wallet_backups,
            dir: self.backups_dir.clone(),
        }
    }
}
