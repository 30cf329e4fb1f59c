//! Threaded timer queue.
//!
//! One worker thread owns the expiration side of a hashed timing wheel. It
//! wakes once per tick, collects due timers and calls their targets with the
//! queue lock released. While a callback runs its timer is marked in flight;
//! `start`/`cancel`/drop from any other thread wait for it to finish, which is
//! what lets a watchdog rely on "after `cancel` returns, no callback is running
//! or will run".
//!
//! Calls made from inside a callback (on the worker thread) never wait and
//! override the status the callback returns.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex, MutexGuard};

use super::tick::TickClock;
use super::wheel::{Wheel, WheelHandle};
use super::{ExpireStatus, Timer, TimerError, TimerNotify, TimerQueue};
use crate::trace::{debug, info, trace, warn};

/// Wheel slots; 1024 slots at the default 10ms tick cover ~10s per rotation.
const WHEEL_SLOTS: usize = 1024;

/// Configuration for a [`WheelTimerQueue`].
#[derive(Debug, Clone)]
pub struct TimerQueueConfig {
    /// Wheel resolution. Timers fire up to one tick late, never early.
    ///
    /// **Default**: 10ms
    pub tick: Duration,

    /// Maximum number of live timers.
    ///
    /// **Default**: 1024
    pub capacity: NonZeroUsize,

    /// Name of the worker thread.
    ///
    /// **Default**: `vigil-timer`
    pub thread_name: String,
}

impl Default for TimerQueueConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
            thread_name: "vigil-timer".into(),
        }
    }
}

impl TimerQueueConfig {
    /// Builder-style setter for the tick resolution.
    #[must_use]
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Builder-style setter for the timer capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder-style setter for the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Error starting a timer queue.
#[derive(Debug, thiserror::Error)]
pub enum TimerQueueError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TimerId(u64);

/// Per-timer bookkeeping, owned by the queue.
struct TimerEntry {
    target: Option<Weak<dyn TimerNotify>>,
    scheduled: Option<WheelHandle>,
    expire_at: Option<Instant>,
    /// The callback is running on the worker thread.
    in_flight: bool,
    /// `start`/`cancel` ran from inside the callback; ignore its return status.
    overridden: bool,
}

struct QueueState {
    wheel: Wheel<TimerId>,
    timers: HashMap<TimerId, TimerEntry>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes the worker early (shutdown).
    wake: Condvar,
    /// Signalled whenever a callback returns.
    idle: Condvar,
    clock: TickClock,
    capacity: usize,
    worker: OnceLock<ThreadId>,
}

impl Shared {
    fn on_worker(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    /// Blocks until `id` has no callback running, unless called from that callback.
    fn wait_idle(&self, state: &mut MutexGuard<'_, QueueState>, id: TimerId) {
        if self.on_worker() {
            return;
        }
        while state.timers.get(&id).is_some_and(|e| e.in_flight) {
            self.idle.wait(state);
        }
    }

    fn arm(&self, state: &mut QueueState, id: TimerId, expire_at: Instant) {
        let QueueState { wheel, timers, .. } = state;
        let Some(entry) = timers.get_mut(&id) else {
            return;
        };
        if let Some(handle) = entry.scheduled.take() {
            wheel.cancel(handle);
        }
        // Every timer owns at most one wheel entry and creation is bounded by
        // the wheel capacity, so scheduling cannot run out of slots.
        match wheel.schedule(self.clock.deadline_tick(expire_at), id) {
            Some(handle) => {
                entry.scheduled = Some(handle);
                entry.expire_at = Some(expire_at);
            }
            None => {
                entry.expire_at = None;
                warn!(timer = id.0, "timer wheel full, expiration dropped");
            }
        }
    }

    fn disarm(state: &mut QueueState, id: TimerId) {
        let QueueState { wheel, timers, .. } = state;
        if let Some(entry) = timers.get_mut(&id) {
            if let Some(handle) = entry.scheduled.take() {
                wheel.cancel(handle);
            }
            entry.expire_at = None;
        }
    }

    fn run(&self) {
        let _ = self.worker.set(thread::current().id());
        let mut state = self.state.lock();
        while !state.shutdown {
            let now = self.clock.tick_at(Instant::now());
            let mut due = Vec::new();
            state.wheel.tick(now, |handle, id| due.push((handle, id)));
            for (handle, id) in due {
                self.fire(&mut state, id, handle);
            }
            if state.shutdown {
                break;
            }
            self.wake.wait_for(&mut state, self.clock.tick());
        }
        debug!(pending = state.wheel.len(), "timer worker exiting");
    }

    fn fire(&self, state: &mut MutexGuard<'_, QueueState>, id: TimerId, handle: WheelHandle) {
        let Some(entry) = state.timers.get_mut(&id) else {
            return;
        };
        // Restarted or canceled while an earlier callback of this tick ran.
        if entry.scheduled != Some(handle) {
            return;
        }
        entry.scheduled = None;
        entry.expire_at = None;
        let Some(target) = entry.target.as_ref().and_then(Weak::upgrade) else {
            trace!(timer = id.0, "timer target gone, skipping expiration");
            return;
        };
        entry.in_flight = true;
        entry.overridden = false;

        // The target may be the last owner of this timer; it must also be
        // dropped with the queue lock released.
        let status = MutexGuard::unlocked(state, move || {
            let status = target.expire(Instant::now());
            drop(target);
            status
        });

        if let Some(entry) = state.timers.get_mut(&id) {
            entry.in_flight = false;
            if !entry.overridden {
                if let ExpireStatus::Restart(delay) = status {
                    match Instant::now().checked_add(delay) {
                        Some(expire_at) => self.arm(state, id, expire_at),
                        None => warn!(timer = id.0, "restart delay out of range, timer stopped"),
                    }
                }
            }
        }
        self.idle.notify_all();
    }
}

/// Timer queue backed by a worker thread and a hashed timing wheel.
pub struct WheelTimerQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WheelTimerQueue {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(config: TimerQueueConfig) -> Result<Self, TimerQueueError> {
        let origin = Instant::now();
        let clock = TickClock::new(origin, config.tick);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                wheel: Wheel::new(WHEEL_SLOTS, config.capacity, clock.tick_at(origin)),
                timers: HashMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
            clock,
            capacity: config.capacity.get(),
            worker: OnceLock::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                info!("timer thread started");
                worker_shared.run();
                info!("timer thread exiting");
            })
            .map_err(TimerQueueError::Spawn)?;

        info!(
            thread = %config.thread_name,
            tick_us = u64::try_from(config.tick.as_micros()).unwrap_or(u64::MAX),
            capacity = config.capacity.get(),
            "timer queue started"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Number of live timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    /// Number of timers currently armed.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.shared.state.lock().wheel.len()
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// Timers stay valid but never fire again. Idempotent; a call from inside a
    /// timer callback only signals the worker.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.shutdown {
                info!("timer queue shutdown initiated");
                state.shutdown = true;
            }
        }
        self.shared.wake.notify_all();
        if self.shared.on_worker() {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl TimerQueue for WheelTimerQueue {
    fn create_timer(&self) -> Result<Box<dyn Timer>, TimerError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(TimerError::Shutdown);
        }
        if state.timers.len() >= self.shared.capacity {
            return Err(TimerError::Capacity {
                capacity: self.shared.capacity,
            });
        }
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.timers.insert(
            id,
            TimerEntry {
                target: None,
                scheduled: None,
                expire_at: None,
                in_flight: false,
                overridden: false,
            },
        );
        trace!(timer = id.0, "timer created");
        Ok(Box::new(QueueTimer {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Drop for WheelTimerQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Timer handed out by [`WheelTimerQueue`].
struct QueueTimer {
    id: TimerId,
    shared: Arc<Shared>,
}

impl Timer for QueueTimer {
    fn start(&self, target: Weak<dyn TimerNotify>, expire_at: Instant) {
        let mut state = self.shared.state.lock();
        self.shared.wait_idle(&mut state, self.id);
        if let Some(entry) = state.timers.get_mut(&self.id) {
            entry.target = Some(target);
            if entry.in_flight {
                entry.overridden = true;
            }
        }
        self.shared.arm(&mut state, self.id, expire_at);
    }

    fn cancel(&self) {
        let mut state = self.shared.state.lock();
        self.shared.wait_idle(&mut state, self.id);
        if let Some(entry) = state.timers.get_mut(&self.id) {
            if entry.in_flight {
                entry.overridden = true;
            }
        }
        Shared::disarm(&mut state, self.id);
    }

    fn expire_delay(&self) -> Option<Duration> {
        let state = self.shared.state.lock();
        state
            .timers
            .get(&self.id)
            .and_then(|e| e.expire_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl Drop for QueueTimer {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        self.shared.wait_idle(&mut state, self.id);
        Shared::disarm(&mut state, self.id);
        state.timers.remove(&self.id);
        trace!(timer = self.id.0, "timer destroyed");
    }
}
