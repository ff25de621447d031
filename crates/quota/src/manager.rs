//! Live cache operations, as far as quota lifecycle hooks are concerned.

use crate::DirectoryLockId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owner of the cache contexts currently operating on origin directories.
///
/// The quota client forwards abort and shutdown requests here; it keeps no
/// operation state of its own.
pub trait OperationManager: Send + Sync {
    /// Abort every operation holding one of the given directory locks.
    fn abort(&self, locks: &[DirectoryLockId]);
    fn abort_all(&self);
    fn initiate_shutdown(&self);
    fn is_shutdown_complete(&self) -> bool;
    /// Human-readable description of what is still running, for shutdown hang reports.
    fn shutdown_status(&self) -> String;
}

pub type OperationsHandle = Arc<dyn OperationManager>;

/// Operation manager for hosts that never open cache contexts.
///
/// Nothing can be running, so aborts are no-ops and shutdown is complete as
/// soon as it is asked for.
#[derive(Debug, Default)]
pub struct IdleOperationManager {
    shutting_down: AtomicBool,
}

impl IdleOperationManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationManager for IdleOperationManager {
    fn abort(&self, locks: &[DirectoryLockId]) {
        tracing::debug!(locks = ?locks, "No cache operations to abort");
    }

    fn abort_all(&self) {
        tracing::debug!("No cache operations to abort");
    }

    fn initiate_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    fn is_shutdown_complete(&self) -> bool {
        true
    }

    fn shutdown_status(&self) -> String {
        if self.shutting_down.load(Ordering::Acquire) {
            "shutdown initiated, no cache contexts open".to_string()
        } else {
            "no cache contexts open".to_string()
        }
    }
}
