//! Circuit lock with scoped release.
//!
//! # Overview
//!
//! - [`CircuitMutex`] - a mutex protecting `T`, created from a [`LockConfig`]
//! - [`CircuitGuard`] - RAII guard; can temporarily release the lock with
//!   [`CircuitGuard::unlocked`] and assert which lock it belongs to
//! - [`CallbackLock`] / [`CallbackGuard`] - the data-less lock that serializes
//!   upcalls into the circuit's user-visible callbacks
//!
//! # Deadlock rule
//!
//! The timer facility's `start`/`cancel` may block until an in-flight expiration
//! callback returns, and that callback takes the callback lock and then the
//! state lock. A thread that holds either lock must therefore release it for the
//! duration of any timer call:
//!
//! ```
//! use vigil::sync::{CallbackLock, LockConfig};
//!
//! let callbacks = CallbackLock::with_config((), LockConfig::default());
//! let mut guard = callbacks.lock();
//! guard.unlocked(|| {
//!     // timer.start(..) goes here, with the callback lock released
//! });
//! // the lock is held again here
//! ```

use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::Once;

use parking_lot::{Mutex, MutexGuard};

use crate::trace::warn;

/// Lock construction options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockConfig {
    /// Ask for priority inheritance if the platform lock supports it.
    ///
    /// **Default**: off
    pub priority_inheritance: bool,
}

impl LockConfig {
    /// Builder-style setter for the priority inheritance request.
    #[must_use]
    pub const fn with_priority_inheritance(mut self, enabled: bool) -> Self {
        self.priority_inheritance = enabled;
        self
    }
}

static PI_UNSUPPORTED: Once = Once::new();

/// Mutex used for a circuit's state lock and callback lock.
pub struct CircuitMutex<T> {
    inner: Mutex<T>,
    priority_inheritance: bool,
}

/// Lock serializing upcalls into the circuit's callback surface.
pub type CallbackLock = CircuitMutex<()>;

/// Guard proving the callback lock is held.
pub type CallbackGuard<'a> = CircuitGuard<'a, ()>;

impl<T> CircuitMutex<T> {
    /// Creates a lock with default options.
    pub fn new(value: T) -> Self {
        Self::with_config(value, LockConfig::default())
    }

    /// Creates a lock from explicit options.
    ///
    /// The parking lock backend has no priority inheritance protocol. A request
    /// for it is logged once per process and [`Self::priority_inheritance`]
    /// reports `false`.
    pub fn with_config(value: T, config: LockConfig) -> Self {
        if config.priority_inheritance {
            PI_UNSUPPORTED.call_once(|| {
                warn!("priority inheritance requested but not supported by the lock backend");
            });
        }
        Self {
            inner: Mutex::new(value),
            priority_inheritance: false,
        }
    }

    /// Whether priority inheritance is in effect for this lock.
    #[must_use]
    pub const fn priority_inheritance(&self) -> bool {
        self.priority_inheritance
    }

    /// Acquires the lock, blocking the current thread until it is available.
    pub fn lock(&self) -> CircuitGuard<'_, T> {
        CircuitGuard {
            owner: self,
            inner: self.inner.lock(),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<CircuitGuard<'_, T>> {
        self.inner.try_lock().map(|inner| CircuitGuard { owner: self, inner })
    }

    /// Whether some thread currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Consumes the lock, returning the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for CircuitMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for CircuitMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitMutex")
            .field("addr", &(self as *const Self))
            .field("locked", &self.is_locked())
            .field("priority_inheritance", &self.priority_inheritance)
            .finish()
    }
}

/// RAII guard for a [`CircuitMutex`].
pub struct CircuitGuard<'a, T> {
    owner: &'a CircuitMutex<T>,
    inner: MutexGuard<'a, T>,
}

impl<T> CircuitGuard<'_, T> {
    /// Releases the lock while `f` runs and reacquires it before returning.
    ///
    /// Use this around any call that may block on a thread which itself needs
    /// this lock (timer start/cancel).
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        MutexGuard::unlocked(&mut self.inner, f)
    }

    /// Whether this guard was produced by `lock`.
    #[must_use]
    pub fn is_guard_of(&self, lock: &CircuitMutex<T>) -> bool {
        core::ptr::eq(self.owner, lock)
    }

    /// Asserts that this guard was produced by `lock`.
    ///
    /// # Panics
    ///
    /// Panics if the guard belongs to another lock. Passing the wrong guard is a
    /// broken caller contract, not a recoverable condition.
    #[track_caller]
    pub fn assert_identical(&self, lock: &CircuitMutex<T>) {
        assert!(
            self.is_guard_of(lock),
            "guard for lock {:p} used where lock {:p} is required",
            self.owner,
            lock
        );
    }
}

impl<T> Deref for CircuitGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for CircuitGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
