//! Small synchronisation primitives shared by the dispatcher and the scheduler.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Step functions and callbacks are foreign code; a panic inside one of them
/// must not leave the engine's own state permanently unreachable.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A reusable open/closed signal.
///
/// Threads block in [`Gate::wait`] while the gate is closed and are released
/// together when it opens. Used as the pause gate of jobs and services and as
/// the stop signal of background loops.
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            changed: Condvar::new(),
        }
    }

    pub fn opened() -> Self {
        Self::new(true)
    }

    pub fn closed() -> Self {
        Self::new(false)
    }

    pub fn open(&self) {
        *lock(&self.open) = true;
        self.changed.notify_all();
    }

    pub fn close(&self) {
        *lock(&self.open) = false;
    }

    pub fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    /// Block until the gate is open.
    pub fn wait(&self) {
        let guard = lock(&self.open);
        let _guard = self
            .changed
            .wait_while(guard, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block for up to `timeout` waiting for the gate to open.
    ///
    /// Returns whether the gate is open on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.open);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |open| !*open)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::opened()
    }
}
