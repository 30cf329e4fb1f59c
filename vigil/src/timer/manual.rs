//! Deterministic timer queue driven by a virtual clock.
//!
//! Nothing fires until the owner calls [`ManualTimerQueue::advance_to`] (or
//! [`ManualTimerQueue::advance`]). Due timers then fire in deadline order on
//! the calling thread, each observing the clock set to its own deadline, and
//! `Restart` statuses rearm relative to that deadline. This makes watchdog
//! sequences such as "expire at t=30, rearm at t=34" reproducible exactly.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use minstant::Instant;
use parking_lot::Mutex;

use super::{ExpireStatus, Timer, TimerError, TimerNotify, TimerQueue};

struct ManualEntry {
    target: Option<Weak<dyn TimerNotify>>,
    expire_at: Option<Instant>,
    in_flight: bool,
    overridden: bool,
}

struct ManualState {
    now: Instant,
    timers: HashMap<u64, ManualEntry>,
    next_id: u64,
    released: usize,
}

/// Timer queue whose clock only moves when told to.
#[derive(Clone)]
pub struct ManualTimerQueue {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimerQueue {
    /// Creates a queue whose clock reads `origin`.
    #[must_use]
    pub fn new(origin: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: origin,
                timers: HashMap::new(),
                next_id: 0,
                released: 0,
            })),
        }
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.state.lock().now
    }

    /// Moves the clock forward by `by`, firing every timer that comes due.
    ///
    /// Returns the number of expirations delivered.
    pub fn advance(&self, by: Duration) -> usize {
        let until = self.now() + by;
        self.advance_to(until)
    }

    /// Moves the clock to `until`, firing every timer that comes due on the way.
    ///
    /// Timers rearmed by a callback fire again within the same call if their new
    /// deadline is not after `until`. The clock never moves backwards.
    ///
    /// Returns the number of expirations delivered.
    pub fn advance_to(&self, until: Instant) -> usize {
        let mut fired = 0;
        loop {
            let mut state = self.state.lock();
            let next = state
                .timers
                .iter()
                .filter_map(|(&id, e)| e.expire_at.map(|at| (at, id)))
                .filter(|&(at, _)| at <= until)
                .min();
            let Some((at, id)) = next else {
                if until > state.now {
                    state.now = until;
                }
                return fired;
            };
            if at > state.now {
                state.now = at;
            }
            let now = state.now;
            let Some(entry) = state.timers.get_mut(&id) else {
                continue;
            };
            entry.expire_at = None;
            let Some(target) = entry.target.as_ref().and_then(Weak::upgrade) else {
                continue;
            };
            entry.in_flight = true;
            entry.overridden = false;
            drop(state);

            let status = target.expire(now);
            drop(target);
            fired += 1;

            let mut state = self.state.lock();
            if let Some(entry) = state.timers.get_mut(&id) {
                entry.in_flight = false;
                if !entry.overridden {
                    if let ExpireStatus::Restart(delay) = status {
                        entry.expire_at = now.checked_add(delay);
                    }
                }
            }
        }
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_expiration(&self) -> Option<Instant> {
        self.state
            .lock()
            .timers
            .values()
            .filter_map(|e| e.expire_at)
            .min()
    }

    /// Number of timers created and not yet dropped.
    #[must_use]
    pub fn live_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Number of timers dropped so far.
    #[must_use]
    pub fn released_timers(&self) -> usize {
        self.state.lock().released
    }
}

impl TimerQueue for ManualTimerQueue {
    fn create_timer(&self) -> Result<Box<dyn Timer>, TimerError> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            ManualEntry {
                target: None,
                expire_at: None,
                in_flight: false,
                overridden: false,
            },
        );
        Ok(Box::new(ManualTimer {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn now(&self) -> Instant {
        ManualTimerQueue::now(self)
    }
}

struct ManualTimer {
    id: u64,
    state: Arc<Mutex<ManualState>>,
}

impl Timer for ManualTimer {
    fn start(&self, target: Weak<dyn TimerNotify>, expire_at: Instant) {
        let mut state = self.state.lock();
        if let Some(entry) = state.timers.get_mut(&self.id) {
            entry.target = Some(target);
            entry.expire_at = Some(expire_at);
            if entry.in_flight {
                entry.overridden = true;
            }
        }
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(entry) = state.timers.get_mut(&self.id) {
            entry.expire_at = None;
            if entry.in_flight {
                entry.overridden = true;
            }
        }
    }

    fn expire_delay(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .timers
            .get(&self.id)
            .and_then(|e| e.expire_at)
            .map(|at| at.saturating_duration_since(state.now))
    }

    fn now(&self) -> Instant {
        self.state.lock().now
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.timers.remove(&self.id).is_some() {
            state.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        hits: AtomicUsize,
        status: ExpireStatus,
        seen: Mutex<Vec<Instant>>,
    }

    impl TimerNotify for Counter {
        fn expire(&self, now: Instant) -> ExpireStatus {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(now);
            self.status
        }
    }

    fn counter(status: ExpireStatus) -> Arc<Counter> {
        Arc::new(Counter {
            hits: AtomicUsize::new(0),
            status,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn fires_at_deadline_not_before() {
        let origin = Instant::now();
        let queue = ManualTimerQueue::new(origin);
        let timer = queue.create_timer().unwrap();
        let target = counter(ExpireStatus::NoRestart);
        let weak: Weak<dyn TimerNotify> = Arc::downgrade(&target) as _;
        timer.start_after(weak, secs(30));

        assert_eq!(queue.advance(secs(29)), 0);
        assert_eq!(timer.expire_delay(), Some(secs(1)));
        assert_eq!(queue.advance(secs(1)), 1);
        assert_eq!(target.seen.lock().as_slice(), &[origin + secs(30)]);
        assert_eq!(timer.expire_delay(), None);
    }

    #[test]
    fn restart_rearms_from_expiration_time() {
        let origin = Instant::now();
        let queue = ManualTimerQueue::new(origin);
        let timer = queue.create_timer().unwrap();
        let target = counter(ExpireStatus::Restart(secs(4)));
        timer.start(Arc::downgrade(&target) as _, origin + secs(30));

        assert_eq!(queue.advance_to(origin + secs(37)), 2);
        assert_eq!(
            target.seen.lock().as_slice(),
            &[origin + secs(30), origin + secs(34)]
        );
        assert_eq!(queue.next_expiration(), Some(origin + secs(38)));
    }

    #[test]
    fn cancel_is_idempotent_and_prevents_fire() {
        let origin = Instant::now();
        let queue = ManualTimerQueue::new(origin);
        let timer = queue.create_timer().unwrap();
        let target = counter(ExpireStatus::NoRestart);
        timer.start(Arc::downgrade(&target) as _, origin + secs(1));
        timer.cancel();
        timer.cancel();
        assert_eq!(timer.expire_delay(), None);
        assert_eq!(queue.advance(secs(10)), 0);
        assert_eq!(target.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_target_is_skipped() {
        let origin = Instant::now();
        let queue = ManualTimerQueue::new(origin);
        let timer = queue.create_timer().unwrap();
        let target = counter(ExpireStatus::NoRestart);
        timer.start(Arc::downgrade(&target) as _, origin + secs(1));
        drop(target);
        assert_eq!(queue.advance(secs(2)), 0);
    }

    #[test]
    fn dropping_timer_releases_it_once() {
        let queue = ManualTimerQueue::new(Instant::now());
        let a = queue.create_timer().unwrap();
        let b = queue.create_timer().unwrap();
        assert_eq!(queue.live_timers(), 2);
        drop(a);
        assert_eq!((queue.live_timers(), queue.released_timers()), (1, 1));
        drop(b);
        assert_eq!((queue.live_timers(), queue.released_timers()), (0, 2));
    }
}
