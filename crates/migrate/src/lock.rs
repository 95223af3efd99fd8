//! Session-scoped advisory lock serializing migration runs

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backends::DatabaseConnection;
use crate::error::{MigrateError, MigrateResult};

/// Lock key shared by every migrator unless configured otherwise
pub const MIGRATION_LOCK_ID: i64 = 9628173550095224;

/// Advisory lock naming one migration domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisoryLock {
    key: i64,
}

impl Default for AdvisoryLock {
    fn default() -> Self {
        Self::new(MIGRATION_LOCK_ID)
    }
}

impl AdvisoryLock {
    pub fn new(key: i64) -> Self {
        Self { key }
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Wait until the session holds the lock.
    ///
    /// If `cancel` fires while waiting the request is interrupted and one
    /// hold is released in case it was granted in the meantime.
    pub async fn acquire(
        &self,
        conn: &mut dyn DatabaseConnection,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        debug!("Acquiring advisory lock {}", self.key);
        match cancellable(cancel, conn.advisory_lock(self.key)).await {
            Ok(locked) => locked?,
            Err(err) => {
                interrupt_abandoned(conn).await;
                if let Err(unlock_err) = conn.advisory_unlock(self.key).await {
                    warn!(
                        "Failed to drop advisory lock {} after cancellation: {}",
                        self.key, unlock_err
                    );
                }
                return Err(err);
            }
        }
        debug!("Acquired advisory lock {}", self.key);
        Ok(())
    }

    /// Release the lock. Not cancellable.
    pub async fn release(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<()> {
        conn.advisory_unlock(self.key).await?;
        debug!("Released advisory lock {}", self.key);
        Ok(())
    }
}

/// Race `fut` against `cancel`, returning `Cancelled` if the token fires first
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> MigrateResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrateError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Stop whatever statement a cancelled call left running on `conn`
pub(crate) async fn interrupt_abandoned(conn: &mut dyn DatabaseConnection) {
    if let Err(err) = conn.interrupt().await {
        warn!("Failed to interrupt cancelled statement: {}", err);
    }
}
