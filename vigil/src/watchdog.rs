//! Receive and send watchdogs for one virtual circuit.
//!
//! The receive watchdog escalates from waiting for traffic to an echo probe to
//! declaring the server unresponsive. The send watchdog reports stalled sends
//! into the receive side through [`SendLivenessSink`], so both directions share
//! one probe cycle.
//!
//! # Locking
//!
//! Each watchdog owns a state lock for its flags. Upcalls into the circuit are
//! serialized under a callback lock shared by both watchdogs of a circuit, and
//! always taken before a state lock. No timer operation is made while either
//! lock is held, because the timer may be waiting for an `expire` that needs
//! those same locks.

pub mod beacon;
pub mod config;
pub mod peer;
pub mod recv;
pub mod send;

#[cfg(test)]
pub(crate) mod testing;

pub use beacon::{BeaconTracker, BeaconVerdict};
pub use config::{ConfigError, WatchdogConfig, ENV_CONN_TMO, ENV_ECHO_TMO, MAX_DURATION};
pub use peer::CircuitPeer;
pub use recv::{RecvStatus, RecvWatchdog};
pub use send::{SendLivenessSink, SendStatus, SendWatchdog};

use crate::timer::TimerError;

/// Error constructing a watchdog.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// The timer queue could not provide a timer.
    #[error("timer unavailable: {0}")]
    Timer(#[from] TimerError),
    /// The configuration was rejected.
    #[error("invalid watchdog configuration: {0}")]
    Config(#[from] ConfigError),
}
