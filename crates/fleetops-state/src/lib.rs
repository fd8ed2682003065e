//! fleetops-state — the only mutable state fleetops keeps on disk.
//!
//! An advisory operation lock serializes destructive controller
//! operations, and per-action cooldown markers throttle the autoscaler.
//! Both are plain-text files under the configured state directory, named
//! after the module.

pub mod cooldown;
pub mod error;
pub mod lock;

pub use cooldown::{ActionClass, CooldownStore};
pub use error::{LockError, LockResult, StateError, StateResult};
pub use lock::{LockGuard, OperationLock, UNLOCKED};
