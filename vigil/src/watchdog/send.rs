//! Send-side circuit watchdog.
//!
//! Armed while a send is blocked in the transport. If the send makes no
//! progress for a full period the stall is reported to the receive side, which
//! probes the server; the two directions share one echo cycle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use minstant::Instant;

use super::config::WatchdogConfig;
use super::peer::CircuitPeer;
use super::WatchdogError;
use crate::sync::{CallbackGuard, CallbackLock, CircuitMutex};
use crate::timer::{ExpireStatus, Timer, TimerNotify, TimerQueue};
use crate::trace::{debug, warn};

/// Receiver of send-side liveness events, normally the receive watchdog.
pub trait SendLivenessSink: Send + Sync {
    /// A send stalled. Called with the callback lock held.
    fn send_timeout_notify(&self, cb: &mut CallbackGuard<'_>, now: Instant);

    /// Bytes are still departing while a send backlog persists.
    fn send_backlog_progress_notify(&self, now: Instant);
}

#[derive(Debug, Default)]
struct SendState {
    send_in_progress: bool,
    stall_detected: bool,
}

/// Snapshot of the send watchdog's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendStatus {
    /// A send is blocked in the transport.
    pub send_in_progress: bool,
    /// The current send already stalled once.
    pub stall_detected: bool,
}

/// Send-side liveness watchdog for one circuit.
pub struct SendWatchdog {
    period: Duration,
    timer: Box<dyn Timer>,
    peer: Arc<dyn CircuitPeer>,
    callbacks: Arc<CallbackLock>,
    sink: Arc<dyn SendLivenessSink>,
    state: CircuitMutex<SendState>,
    this: Weak<Self>,
}

impl SendWatchdog {
    /// Creates a stopped watchdog reporting stalls into `sink`.
    ///
    /// `callbacks` must be the lock the sink expects its guard from.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the queue cannot
    /// provide a timer.
    pub fn new(
        peer: Arc<dyn CircuitPeer>,
        callbacks: Arc<CallbackLock>,
        sink: Arc<dyn SendLivenessSink>,
        queue: &dyn TimerQueue,
        config: &WatchdogConfig,
    ) -> Result<Arc<Self>, WatchdogError> {
        config.validate()?;
        let timer = queue.create_timer()?;
        Ok(Arc::new_cyclic(|this| Self {
            period: config.send_period,
            timer,
            peer,
            callbacks,
            sink,
            state: CircuitMutex::new(SendState::default()),
            this: this.clone(),
        }))
    }

    /// Configured stall period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    fn target(&self) -> Weak<dyn TimerNotify> {
        self.this.clone()
    }

    /// A send is about to block in the transport.
    pub fn send_start_notify(&self, now: Instant) {
        {
            let mut state = self.state.lock();
            state.send_in_progress = true;
            state.stall_detected = false;
        }
        self.timer.start(self.target(), now + self.period);
    }

    /// Bytes departed while the send is still blocked.
    pub fn send_progress_notify(&self, now: Instant) {
        let in_progress = {
            let mut state = self.state.lock();
            if state.send_in_progress {
                state.stall_detected = false;
            }
            state.send_in_progress
        };
        if in_progress {
            self.timer.start(self.target(), now + self.period);
            self.sink.send_backlog_progress_notify(now);
        }
    }

    /// The send finished.
    pub fn send_complete_notify(&self) {
        {
            let mut state = self.state.lock();
            state.send_in_progress = false;
            state.stall_detected = false;
        }
        self.timer.cancel();
    }

    /// Stops the timer without touching the flags. Idempotent.
    pub fn cancel(&self) {
        self.timer.cancel();
        debug!("canceling circuit send watchdog");
    }

    /// Time until the next expiration, `None` when stopped.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.timer.expire_delay()
    }

    /// Current flags.
    #[must_use]
    pub fn status(&self) -> SendStatus {
        let state = self.state.lock();
        SendStatus {
            send_in_progress: state.send_in_progress,
            stall_detected: state.stall_detected,
        }
    }

    /// Human-readable description; `level > 0` adds the flags.
    #[must_use]
    pub fn show(&self, level: u32) -> String {
        let status = self.status();
        let mut out = format!(
            "Send virtual circuit watchdog at {:p}, period {:.6}\n",
            self,
            self.period.as_secs_f64()
        );
        if level > 0 {
            let mut tags = Vec::new();
            if status.send_in_progress {
                tags.push("send-in-progress");
            }
            if status.stall_detected {
                tags.push("send-stall-detected");
            }
            out.push('\t');
            out.push_str(&tags.join(" "));
            out.push('\n');
        }
        out
    }
}

impl TimerNotify for SendWatchdog {
    fn expire(&self, now: Instant) -> ExpireStatus {
        if !self.state.lock().send_in_progress {
            return ExpireStatus::NoRestart;
        }
        if self.peer.receive_thread_is_busy() {
            debug!("send stalled while receive thread busy - extending send watchdog");
            return ExpireStatus::Restart(self.period);
        }
        let mut cb = self.callbacks.lock();
        {
            let mut state = self.state.lock();
            if !state.send_in_progress {
                return ExpireStatus::NoRestart;
            }
            state.stall_detected = true;
            warn!(
                host = %self.peer.host_name(),
                stalled_secs = self.period.as_secs_f64(),
                "send made no progress - probing server"
            );
            self.peer.notify_send_timeout(&cb);
        }
        self.sink.send_timeout_notify(&mut cb, now);
        ExpireStatus::NoRestart
    }
}
