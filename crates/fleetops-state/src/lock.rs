//! Advisory operation lock.
//!
//! A single file holds either the sentinel [`UNLOCKED`] or the name of the
//! operation that owns it. The lock is not reentrant and assumes one host:
//! two processes on different machines never see each other's file.
//!
//! Acquisition is write-then-confirm. After writing its name an operation
//! re-reads the file a few times; if another writer clobbered it in the
//! meantime the operation backs off with [`LockError::Race`] and leaves the
//! file to whoever holds it now.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fleetops_core::PollBudget;
use tracing::{debug, info, warn};

use crate::error::{LockError, LockResult};

/// File content meaning nobody holds the lock.
pub const UNLOCKED: &str = "n";

#[derive(Debug, Clone)]
pub struct OperationLock {
    path: PathBuf,
}

impl OperationLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Lock file for `module` under `state_dir`.
    pub fn for_module(state_dir: &Path, module: &str) -> Self {
        Self::new(state_dir.join(format!("fleetops-{module}-op.lock")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder, or `None` when the file is missing or unlocked.
    pub fn holder(&self) -> LockResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let content = content.trim();
                if content.is_empty() || content == UNLOCKED {
                    Ok(None)
                } else {
                    Ok(Some(content.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_locked(&self) -> LockResult<bool> {
        Ok(self.holder()?.is_some())
    }

    /// Fail with [`LockError::Contention`] naming the holder if the lock is
    /// taken. A lock held by `operation` itself also counts as taken.
    pub fn ensure_free(&self, operation: &str) -> LockResult<()> {
        match self.holder()? {
            Some(holder) => Err(LockError::Contention {
                operation: operation.to_string(),
                holder,
            }),
            None => Ok(()),
        }
    }

    /// Record `operation` as the holder.
    pub fn acquire(&self, operation: &str) -> LockResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, operation)?;
        debug!(path = %self.path.display(), operation, "lock written");
        Ok(())
    }

    /// Re-read the file once per budget interval and check that `operation`
    /// still owns it on every read.
    pub async fn confirm_held(&self, operation: &str, budget: PollBudget) -> LockResult<()> {
        for attempt in 1..=budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
            let holder = self.holder()?;
            if holder.as_deref() != Some(operation) {
                let holder = holder.unwrap_or_else(|| UNLOCKED.to_string());
                warn!(operation, %holder, attempt, "lock ownership changed during confirmation");
                return Err(LockError::Race {
                    operation: operation.to_string(),
                    holder,
                });
            }
        }
        Ok(())
    }

    /// Reset the file to the sentinel. Releasing an unlocked lock is a no-op
    /// that still leaves the sentinel behind.
    pub fn release(&self) -> LockResult<()> {
        fs::write(&self.path, UNLOCKED)?;
        debug!(path = %self.path.display(), "lock released");
        Ok(())
    }

    /// Check, acquire and confirm in one step.
    ///
    /// The returned guard releases the lock when dropped. On a race the lock
    /// is left untouched because it now belongs to someone else; any other
    /// confirmation failure resets it before returning.
    pub async fn lock(&self, operation: &str, confirm: PollBudget) -> LockResult<LockGuard> {
        self.ensure_free(operation)?;
        self.acquire(operation)?;
        if let Err(e) = self.confirm_held(operation, confirm).await {
            if !matches!(e, LockError::Race { .. })
                && let Err(release) = self.release()
            {
                warn!(operation, error = %release, "failed to reset lock after confirmation error");
            }
            return Err(e);
        }
        info!(operation, "operation lock held");
        Ok(LockGuard {
            lock: self.clone(),
            operation: operation.to_string(),
            released: false,
        })
    }
}

/// Held operation lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: OperationLock,
    operation: String,
    released: bool,
}

impl LockGuard {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Release now and surface any I/O error instead of logging it.
    pub fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release() {
            warn!(operation = %self.operation, error = %e, "failed to release operation lock");
        }
    }
}
