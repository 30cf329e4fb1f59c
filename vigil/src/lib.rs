//! Liveness watchdogs for long-lived client/server circuits.
//!
//! A TCP connection can stay open long after the server behind it stopped
//! processing messages. `vigil` detects that at the application level: a
//! receive watchdog probes an idle server with an echo request and declares it
//! unresponsive when the echo does not come back in time, a send watchdog turns
//! stalled sends into probes, and server beacons keep quiet circuits alive once
//! their cadence has been seen to be regular.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vigil::{CircuitLiveness, TimerQueueConfig, WatchdogConfig, WheelTimerQueue};
//! # fn peer() -> Arc<dyn vigil::CircuitPeer> { unimplemented!() }
//!
//! let queue = WheelTimerQueue::spawn(TimerQueueConfig::default())?;
//! let liveness = CircuitLiveness::new(peer(), &queue, &WatchdogConfig::from_env()?)?;
//! liveness.connect_notify();
//! // receive thread, per message:
//! liveness.message_arrival_notify(minstant::Instant::now());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod liveness;
pub mod net;
pub mod sync;
pub mod timer;
pub mod watchdog;

mod trace;

pub use liveness::CircuitLiveness;
pub use sync::{CallbackGuard, CallbackLock, CircuitGuard, CircuitMutex, LockConfig};
pub use timer::{
    ExpireStatus, ManualTimerQueue, Timer, TimerError, TimerNotify, TimerQueue, TimerQueueConfig,
    TimerQueueError, WheelTimerQueue,
};
pub use trace::init_tracing;
pub use watchdog::{
    BeaconTracker, BeaconVerdict, CircuitPeer, ConfigError, RecvStatus, RecvWatchdog,
    SendLivenessSink, SendStatus, SendWatchdog, WatchdogConfig, WatchdogError, MAX_DURATION,
};
