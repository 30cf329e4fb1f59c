//! Timer facility used by the watchdogs.
//!
//! A [`TimerQueue`] hands out single-shot [`Timer`]s. Arming a timer names a
//! [`TimerNotify`] target; when the deadline passes the queue calls
//! [`TimerNotify::expire`] on its own thread and the returned [`ExpireStatus`]
//! decides whether the timer rearms itself.
//!
//! Two queues are provided:
//! - [`WheelTimerQueue`]: a worker thread driving a hashed timing wheel.
//! - [`ManualTimerQueue`]: a virtual clock advanced explicitly, for simulation
//!   and deterministic tests.
//!
//! # Blocking semantics
//!
//! [`Timer::start`] and [`Timer::cancel`] block while the timer's callback is
//! running on another thread. Callers must not hold any lock that the callback
//! takes (see [`crate::sync::mutex`]).

mod manual;
mod queue;
mod tick;
mod wheel;

use std::sync::Weak;
use std::time::Duration;

use minstant::Instant;

pub use manual::ManualTimerQueue;
pub use queue::{TimerQueueConfig, TimerQueueError, WheelTimerQueue};

/// What the queue does with a timer after its callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireStatus {
    /// Leave the timer stopped.
    NoRestart,
    /// Rearm the timer this long after the expiration.
    Restart(Duration),
}

/// Receiver of timer expirations.
pub trait TimerNotify: Send + Sync {
    /// Called on the queue's thread once the deadline has passed.
    fn expire(&self, now: Instant) -> ExpireStatus;
}

/// Single-shot countdown timer.
///
/// Dropping the timer cancels it (blocking like [`Timer::cancel`]) and returns
/// its slot to the queue.
pub trait Timer: Send + Sync {
    /// Arms the timer to notify `target` at `expire_at`, replacing any earlier deadline.
    fn start(&self, target: Weak<dyn TimerNotify>, expire_at: Instant);

    /// Arms the timer to notify `target` once `delay` has elapsed.
    fn start_after(&self, target: Weak<dyn TimerNotify>, delay: Duration) {
        self.start(target, self.now() + delay);
    }

    /// Stops the timer. Idempotent.
    fn cancel(&self);

    /// Time left until the next expiration, `None` when stopped.
    fn expire_delay(&self) -> Option<Duration>;

    /// Current time on the clock this timer is measured against.
    fn now(&self) -> Instant;
}

/// Source of timers sharing one expiration thread.
pub trait TimerQueue: Send + Sync {
    /// Creates a stopped timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue is at capacity or shut down.
    fn create_timer(&self) -> Result<Box<dyn Timer>, TimerError>;

    /// Current time on the queue's clock.
    fn now(&self) -> Instant;
}

/// Error creating a timer.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// Every timer slot is in use.
    #[error("timer queue full ({capacity} timers)")]
    Capacity {
        /// Configured number of timers.
        capacity: usize,
    },
    /// The queue's worker has stopped.
    #[error("timer queue is shut down")]
    Shutdown,
}
