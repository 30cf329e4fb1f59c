//! Log output for the watchdogs and the timer queue.
//!
//! Levels used by the crate:
//! - `warn`: a server declared unresponsive, a send stall, a dropped expiration
//! - `info`: timer queue start and shutdown, circuit liveness creation
//! - `debug`: every watchdog transition (probe sent, response, rearm, cancel)
//! - `trace`: per-timer bookkeeping in the queue
//!
//! Without the `tracing` feature the macros expand to nothing, and so do their
//! arguments.

/// Installs a subscriber printing uptime, thread and target for each event.
///
/// The filter comes from `RUST_LOG`, falling back to `vigil=trace`. Calling it
/// again keeps the first subscriber. A no-op without the `tracing` feature.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=trace"));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! discard {
    ($($arg:tt)*) => { () };
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {discard as debug, discard as info, discard as trace, discard as warn};
