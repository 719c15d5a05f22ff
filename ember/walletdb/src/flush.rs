//! Periodic checkpoint of idle wallet databases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::debug;

use crate::batch::WalletDatabase;
use crate::config::WalletDbConfig;

/// Seconds a database must stay quiet before it is flushed.
const WALLET_FLUSH_QUIET_SECS: u64 = 2;

/// Registry of open wallet databases. Owns the process-wide guarantee that
/// at most one flush pass runs at any instant.
#[derive(Default)]
pub struct DatabaseRegistry {
    wallets: Mutex<Vec<Arc<WalletDatabase>>>,
    flush_running: AtomicBool,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, db: Arc<WalletDatabase>) {
        self.wallets.lock().push(db);
    }

    pub fn wallets(&self) -> Vec<Arc<WalletDatabase>> {
        self.wallets.lock().clone()
    }

    fn try_enter_flush(&self) -> bool {
        !self.flush_running.swap(true, Ordering::AcqRel)
    }

    fn leave_flush(&self) {
        self.flush_running.store(false, Ordering::Release);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Flush every registered database that has pending mutations and has been
/// quiet for at least two seconds. Re-entry while a pass is running returns
/// immediately.
pub fn maybe_flush_wallets(registry: &DatabaseRegistry, config: &WalletDbConfig) {
    if !registry.try_enter_flush() {
        return;
    }
    if !config.flush_wallet {
        registry.leave_flush();
        return;
    }

    for db in registry.wallets() {
        let counter = db.update_counter();
        let now = unix_now();

        if db.last_seen() != counter {
            db.set_last_seen(counter);
            db.set_last_update_time(now);
        }

        if db.last_flushed() != counter
            && now.saturating_sub(db.last_update_time()) >= WALLET_FLUSH_QUIET_SECS
        {
            if db.flush().is_ok() {
                db.set_last_flushed(counter);
                debug!(counter, "wallet database flushed");
            }
        }
    }

    registry.leave_flush();
}
