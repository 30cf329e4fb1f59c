//! Synchronization primitives shared by a circuit and its watchdogs.
//!
//! The circuit uses two locks: the state lock guarding watchdog flags and the
//! callback lock serializing upcalls into user code. Both are
//! [`CircuitMutex`] instances; see [`mutex`] for the scoped-release helper
//! that keeps timer calls outside of every lock.

pub mod mutex;

pub use mutex::{CallbackGuard, CallbackLock, CircuitGuard, CircuitMutex, LockConfig};
