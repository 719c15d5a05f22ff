//! Rolling file-level wallet backups with bounded retention.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::wallet::WalletState;

/// Sentinel stored in [`BackupSettings::count`] after a directory failure.
pub const BACKUPS_DISABLED_ON_ERROR: i32 = -1;
/// Sentinel stored after aborting because the wallet was locked.
pub const BACKUPS_DISABLED_WALLET_LOCKED: i32 = -2;

/// Mutable backup policy: desired retention plus the target directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupSettings {
    /// Backups to retain; zero or less disables the feature. Failures
    /// overwrite this with a negative sentinel.
    pub count: i32,
    pub dir: PathBuf,
}

/// What a backup invocation produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BackupOutcome {
    /// The freshly written backup file, when one was produced.
    pub file: Option<PathBuf>,
    /// Non-fatal condition the caller should surface to the user.
    pub warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("unable to create wallet backup folder {dir}: {source}")]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create backup {file}: {source}")]
    Copy {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to delete old backup {file}: {source}")]
    Prune {
        file: PathBuf,
        source: std::io::Error,
    },
}

/// Take a timestamped copy of the wallet file and prune old copies.
///
/// Pass the open wallet when there is one: its keys-left counter is
/// refreshed from the pool and a locked wallet aborts the backup with a
/// warning. The file copy itself happens whenever `wallet_file` is known.
pub fn auto_backup_wallet<W: WalletState>(
    wallet: Option<&mut W>,
    wallet_file: &Path,
    settings: &mut BackupSettings,
) -> Result<BackupOutcome, BackupError> {
    if settings.count <= 0 {
        info!("automatic wallet backups are disabled");
        return Ok(BackupOutcome {
            file: None,
            warning: Some("automatic wallet backups are disabled".to_string()),
        });
    }

    // Always create the folder so the user's file browser is not confused.
    if !settings.dir.exists() {
        info!(dir = %settings.dir.display(), "creating backup folder");
        if let Err(source) = fs::create_dir_all(&settings.dir) {
            settings.count = BACKUPS_DISABLED_ON_ERROR;
            return Err(BackupError::CreateDir {
                dir: settings.dir.clone(),
                source,
            });
        }
    }

    let wallet_name = wallet_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "wallet".to_string());
    let stamp = Utc::now().format("%Y-%m-%d-%H-%M");
    let backup_file = settings.dir.join(format!("{wallet_name}.{stamp}"));

    if let Some(wallet) = wallet {
        let keys_left = wallet.keypool_size();
        wallet.set_keys_left_since_auto_backup(keys_left);
        info!(keys_left, "keys left since automatic backup");
        if wallet.is_locked() {
            let warning = "wallet is locked, cannot replenish the key pool; automatic \
                           backups are disabled until it is unlocked"
                .to_string();
            warn!("{warning}");
            settings.count = BACKUPS_DISABLED_WALLET_LOCKED;
            return Ok(BackupOutcome {
                file: None,
                warning: Some(warning),
            });
        }
    }

    let mut outcome = BackupOutcome::default();
    if backup_file.exists() {
        let warning = "failed to create backup, file already exists; this can happen \
                       when the wallet is restarted within one minute"
            .to_string();
        warn!("{warning}");
        outcome.warning = Some(warning);
        return Ok(outcome);
    }

    if wallet_file.exists() {
        match fs::copy(wallet_file, &backup_file) {
            Ok(_) => {
                info!(
                    from = %wallet_file.display(),
                    to = %backup_file.display(),
                    "created wallet backup"
                );
                outcome.file = Some(backup_file);
            }
            Err(source) => {
                settings.count = BACKUPS_DISABLED_ON_ERROR;
                return Err(BackupError::Copy {
                    file: backup_file,
                    source,
                });
            }
        }
    }

    prune_old_backups(&wallet_name, settings)?;
    Ok(outcome)
}

/// Delete the oldest backups of this wallet until at most `count` remain.
fn prune_old_backups(wallet_name: &str, settings: &BackupSettings) -> Result<(), BackupError> {
    let Ok(entries) = fs::read_dir(&settings.dir) else {
        return Ok(());
    };

    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let stem_matches = path
            .file_stem()
            .map(|stem| stem.to_string_lossy() == wallet_name)
            .unwrap_or(false);
        if !stem_matches {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        backups.push((modified, path));
    }

    backups.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = backups.len().saturating_sub(settings.count.max(0) as usize);
    for (_, path) in backups.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => info!(file = %path.display(), "old backup deleted"),
            Err(source) => {
                return Err(BackupError::Prune { file: path, source });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write as _;

    use tempfile::tempdir;

    use super::*;
    use crate::wallet::Wallet;

    fn write_wallet_file(path: &Path) {
        let mut file = File::create(path).expect("create wallet file");
        file.write_all(b"wallet-bytes").expect("write");
    }

    fn settings(dir: &Path, count: i32) -> BackupSettings {
        BackupSettings {
            count,
            dir: dir.join("backups"),
        }
    }

    #[test]
    fn disabled_when_count_is_zero() {
        let dir = tempdir().expect("tempdir");
        let wallet_file = dir.path().join("burrow.wal");
        write_wallet_file(&wallet_file);
        let mut settings = settings(dir.path(), 0);

        let outcome = auto_backup_wallet::<Wallet>(None, &wallet_file, &mut settings)
            .expect("disabled is not an error");
        assert!(outcome.file.is_none());
        assert!(outcome.warning.is_some());
        assert!(!settings.dir.exists());
    }

    #[test]
    fn copy_and_same_minute_collision() {
        let dir = tempdir().expect("tempdir");
        let wallet_file = dir.path().join("burrow.wal");
        write_wallet_file(&wallet_file);
        let mut settings = settings(dir.path(), 5);

        let first = auto_backup_wallet::<Wallet>(None, &wallet_file, &mut settings)
            .expect("first backup");
        let created = first.file.expect("backup file");
        assert!(created.exists());

        // Same minute: the name collides and the copy is refused.
        let second = auto_backup_wallet::<Wallet>(None, &wallet_file, &mut settings)
            .expect("collision is a warning");
        assert!(second.file.is_none());
        assert!(second.warning.is_some());
    }

    #[test]
    fn locked_wallet_aborts_with_sentinel() {
        let dir = tempdir().expect("tempdir");
        let wallet_file = dir.path().join("burrow.wal");
        write_wallet_file(&wallet_file);
        let mut settings = settings(dir.path(), 5);

        let mut wallet = Wallet::new();
        wallet.locked = true;
        wallet.key_pool.insert(
            1,
            crate::types::KeyPoolEntry::new(
                1_700_000_000,
                crate::types::tests::sample_pubkey(1),
                false,
            ),
        );

        let outcome = auto_backup_wallet(Some(&mut wallet), &wallet_file, &mut settings)
            .expect("lock is a warning");
        assert!(outcome.file.is_none());
        assert_eq!(settings.count, BACKUPS_DISABLED_WALLET_LOCKED);
        assert_eq!(wallet.keys_left_since_auto_backup, 1);
    }

    #[test]
    fn retention_keeps_the_newest_files() {
        let dir = tempdir().expect("tempdir");
        let wallet_file = dir.path().join("burrow.wal");
        write_wallet_file(&wallet_file);
        let mut settings = settings(dir.path(), 3);
        fs::create_dir_all(&settings.dir).expect("backup dir");

        // Six backups with distinct minute stamps and increasing mtimes.
        let mut names = Vec::new();
        for minute in 0..6 {
            let name = format!("burrow.wal.2026-08-02-12-0{minute}");
            let path = settings.dir.join(&name);
            write_wallet_file(&path);
            let mtime = filetime_from_minute(minute);
            set_mtime(&path, mtime);
            names.push(path);
        }
        // An unrelated file is never pruned.
        let unrelated = settings.dir.join("other.dat.2026-08-02-12-00");
        write_wallet_file(&unrelated);

        prune_old_backups("burrow.wal", &settings).expect("prune");

        let survivors: Vec<bool> = names.iter().map(|path| path.exists()).collect();
        assert_eq!(survivors, vec![false, false, false, true, true, true]);
        assert!(unrelated.exists());
    }

    fn filetime_from_minute(minute: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000 + minute * 60)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = File::options().write(true).open(path).expect("open");
        file.set_modified(time).expect("set mtime");
    }
}
