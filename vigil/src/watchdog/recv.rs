//! Receive-side circuit watchdog.
//!
//! Tracks how recently the server was heard from and escalates through an echo
//! probe before declaring the circuit dead.
//!
//! ```text
//!                  message / trusted beacon: rearm(now + period)
//!                 ┌──────────────┐
//!                 ▼              │
//!   connect ──> WaitingForTraffic ──expire──> ProbePending ──expire──> timeout
//!                 ▲                  (probe)    │   ▲        (notify peer)
//!                 │                             │   │
//!                 └──── on-time response ───────┘   └── late response: re-probe
//! ```
//!
//! Every entry point decides under the state lock, releases it (and, where the
//! caller passed one, the callback guard), and only then touches the timer.

use std::sync::{Arc, Weak};
use std::time::Duration;

use minstant::Instant;

use super::config::WatchdogConfig;
use super::peer::CircuitPeer;
use super::send::SendLivenessSink;
use super::WatchdogError;
use crate::sync::{CallbackGuard, CallbackLock, CircuitMutex};
use crate::timer::{ExpireStatus, Timer, TimerNotify, TimerQueue};
use crate::trace::{debug, warn};

/// Flags guarded by the state lock.
#[derive(Debug)]
struct RecvState {
    probe_response_pending: bool,
    beacon_anomaly: bool,
    probe_timeout_detected: bool,
}

/// Snapshot of the receive watchdog's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvStatus {
    /// An echo request is outstanding.
    pub probe_response_pending: bool,
    /// Beacons are not trusted until a real message arrives.
    pub beacon_anomaly: bool,
    /// The outstanding probe's deadline already passed once.
    pub probe_timeout_detected: bool,
}

/// Receive-side liveness watchdog for one circuit.
pub struct RecvWatchdog {
    period: Duration,
    echo_timeout: Duration,
    timer: Box<dyn Timer>,
    peer: Arc<dyn CircuitPeer>,
    callbacks: Arc<CallbackLock>,
    state: CircuitMutex<RecvState>,
    this: Weak<Self>,
}

impl RecvWatchdog {
    /// Creates a stopped watchdog; [`Self::connect_notify`] arms it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the queue cannot
    /// provide a timer.
    pub fn new(
        peer: Arc<dyn CircuitPeer>,
        callbacks: Arc<CallbackLock>,
        queue: &dyn TimerQueue,
        config: &WatchdogConfig,
    ) -> Result<Arc<Self>, WatchdogError> {
        config.validate()?;
        let timer = queue.create_timer()?;
        Ok(Arc::new_cyclic(|this| Self {
            period: config.period,
            echo_timeout: config.echo_timeout,
            timer,
            peer,
            callbacks,
            // No real message has been seen yet, so beacons are not trusted.
            state: CircuitMutex::new(RecvState {
                probe_response_pending: false,
                beacon_anomaly: true,
                probe_timeout_detected: false,
            }),
            this: this.clone(),
        }))
    }

    /// Configured idle period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Configured echo timeout.
    #[must_use]
    pub fn echo_timeout(&self) -> Duration {
        self.echo_timeout
    }

    /// The callback lock upcalls are serialized under.
    #[must_use]
    pub fn callback_lock(&self) -> &Arc<CallbackLock> {
        &self.callbacks
    }

    fn target(&self) -> Weak<dyn TimerNotify> {
        self.this.clone()
    }

    fn restart(&self, expire_at: Instant) {
        self.timer.start(self.target(), expire_at);
    }

    /// The circuit connected; start watching for inbound traffic.
    pub fn connect_notify(&self) {
        self.timer.start_after(self.target(), self.period);
        debug!(
            period_secs = self.period.as_secs_f64(),
            "connected to the server - initiating circuit recv watchdog"
        );
    }

    /// An application message arrived from the server.
    ///
    /// Restarts the idle countdown unless a probe is outstanding; only the probe
    /// response may end a probe.
    pub fn message_arrival_notify(&self, now: Instant) {
        let restart = {
            let mut state = self.state.lock();
            if state.probe_response_pending {
                false
            } else {
                state.beacon_anomaly = false;
                true
            }
        };
        if restart {
            self.restart(now + self.period);
            debug!("received a message - resetting circuit recv watchdog");
        }
    }

    /// A regular beacon arrived from the server.
    pub fn beacon_arrival_notify(&self, now: Instant) {
        let restart = {
            let state = self.state.lock();
            !state.beacon_anomaly && !state.probe_response_pending
        };
        if restart {
            self.restart(now + self.period);
            debug!("saw a normal beacon - resetting circuit recv watchdog");
        }
    }

    /// An irregular beacon arrived.
    ///
    /// Beacons are not trusted again until a real message arrives. A server
    /// rebooted twice in quick succession can otherwise hide a dead interval
    /// behind one beacon.
    pub fn beacon_anomaly_notify(&self) {
        self.state.lock().beacon_anomaly = true;
        debug!("saw an abnormal beacon");
    }

    /// The server answered an echo probe.
    ///
    /// The caller holds the callback lock; it is released while the timer is
    /// rearmed.
    ///
    /// # Panics
    ///
    /// Panics if `cb` does not belong to this watchdog's callback lock.
    pub fn probe_response_notify(&self, cb: &mut CallbackGuard<'_>, now: Instant) {
        cb.assert_identical(&self.callbacks);
        let restart_delay = {
            let mut state = self.state.lock();
            if !state.probe_response_pending {
                None
            } else if state.probe_timeout_detected {
                state.probe_timeout_detected = false;
                state.probe_response_pending = self.peer.request_echo_probe();
                debug!("late probe response - sending another probe request");
                Some(self.echo_timeout)
            } else {
                state.probe_response_pending = false;
                self.peer.notify_responsive(cb);
                debug!("probe response on time - circuit will be tagged responsive");
                Some(self.period)
            }
        };
        if let Some(delay) = restart_delay {
            cb.unlocked(|| self.restart(now + delay));
        }
    }

    /// Outbound messages are still departing while a send backlog persists.
    ///
    /// A deep send queue can delay both the probe's departure and the reply, so
    /// the probe deadline is pushed out. `beacon_anomaly` is left alone: only a
    /// real message restores trust in beacons.
    pub fn send_backlog_progress_notify(&self, now: Instant) {
        let restart = self.state.lock().probe_response_pending;
        if restart {
            self.restart(now + self.echo_timeout);
            debug!("saw heavy send backlog - resetting circuit recv watchdog");
        }
    }

    /// A send stalled; probe the server unless a probe is already outstanding.
    ///
    /// # Panics
    ///
    /// Panics if `cb` does not belong to this watchdog's callback lock.
    pub fn send_timeout_notify(&self, cb: &mut CallbackGuard<'_>, now: Instant) {
        cb.assert_identical(&self.callbacks);
        let restart = {
            let mut state = self.state.lock();
            if state.probe_response_pending {
                false
            } else {
                state.probe_response_pending = self.peer.request_echo_probe();
                true
            }
        };
        if restart {
            cb.unlocked(|| self.restart(now + self.echo_timeout));
            debug!("send timed out - sending echo request");
        }
    }

    /// Stops the timer. Idempotent.
    pub fn cancel(&self) {
        self.timer.cancel();
        debug!("canceling circuit recv watchdog");
    }

    /// Time until the next expiration, `None` when stopped.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.timer.expire_delay()
    }

    /// Current flags.
    #[must_use]
    pub fn status(&self) -> RecvStatus {
        let state = self.state.lock();
        RecvStatus {
            probe_response_pending: state.probe_response_pending,
            beacon_anomaly: state.beacon_anomaly,
            probe_timeout_detected: state.probe_timeout_detected,
        }
    }

    /// Human-readable description; `level > 0` adds the flags.
    #[must_use]
    pub fn show(&self, level: u32) -> String {
        let state = self.state.lock();
        let mut out = format!(
            "Receive virtual circuit watchdog at {:p}, period {:.6}\n",
            self,
            self.period.as_secs_f64()
        );
        if level > 0 {
            let tags = [
                (state.probe_response_pending, "probe-response-pending"),
                (state.beacon_anomaly, "beacon-anomaly-detected"),
                (state.probe_timeout_detected, "probe-response-timeout"),
            ];
            let set: Vec<&str> = tags
                .iter()
                .filter(|(on, _)| *on)
                .map(|&(_, tag)| tag)
                .collect();
            out.push('\t');
            out.push_str(&set.join(" "));
            out.push('\n');
        }
        out
    }

    fn probe_timed_out(&self, cb: &CallbackGuard<'_>) -> ExpireStatus {
        if self.peer.bytes_pending_at_transport() {
            // The socket holds unread replies: the client, not the server, is slow.
            self.peer.emit_diagnostic(
                cb,
                format_args!(
                    "The server inactivity timer initiated a disconnect although messages \
                     from this server are waiting to be processed by the client"
                ),
            );
            self.peer.emit_diagnostic(
                cb,
                format_args!(
                    "Possible causes: the client has not serviced its event loop for {:.6} seconds, \
                     or the application is blocked in a callback",
                    self.period.as_secs_f64()
                ),
            );
        }
        let mut state = self.state.lock();
        if !state.probe_response_pending {
            // Flag cleared since it was first read; the response path owns the timer.
            debug!("probe response raced the probe deadline - keeping circuit");
            return ExpireStatus::NoRestart;
        }
        warn!(
            host = %self.peer.host_name(),
            inactive_secs = self.period.as_secs_f64(),
            "server unresponsive - disconnecting"
        );
        self.peer.notify_receive_timeout(cb);
        state.probe_timeout_detected = true;
        ExpireStatus::NoRestart
    }
}

impl TimerNotify for RecvWatchdog {
    fn expire(&self, _now: Instant) -> ExpireStatus {
        let cb = self.callbacks.lock();
        let pending = self.state.lock().probe_response_pending;
        if pending {
            return self.probe_timed_out(&cb);
        }
        {
            let mut state = self.state.lock();
            state.probe_timeout_detected = false;
            state.probe_response_pending = self.peer.request_echo_probe();
        }
        drop(cb);
        debug!("circuit timed out - sending echo request");
        ExpireStatus::Restart(self.echo_timeout)
    }
}

impl SendLivenessSink for RecvWatchdog {
    fn send_timeout_notify(&self, cb: &mut CallbackGuard<'_>, now: Instant) {
        RecvWatchdog::send_timeout_notify(self, cb, now);
    }

    fn send_backlog_progress_notify(&self, now: Instant) {
        RecvWatchdog::send_backlog_progress_notify(self, now);
    }
}
