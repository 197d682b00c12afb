//! Mutex access that reads through poisoning.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locking for shared recorders whose contents stay valid after a holder panics.
pub trait RecoverLock<T> {
    /// Locks, taking the guard out of the poison error if a previous holder panicked.
    fn recover(&self) -> MutexGuard<'_, T>;

    /// Runs `action` against the locked value.
    fn with_recovered<R>(&self, action: impl FnOnce(&mut T) -> R) -> R;
}

impl<T> RecoverLock<T> for Mutex<T> {
    fn recover(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_recovered<R>(&self, action: impl FnOnce(&mut T) -> R) -> R {
        action(&mut self.recover())
    }
}
