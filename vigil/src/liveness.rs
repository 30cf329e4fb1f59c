//! Per-circuit liveness supervision.
//!
//! [`CircuitLiveness`] owns both watchdogs of one circuit, the callback lock
//! they share and the beacon tracker feeding the receive side. The circuit's
//! receive, send and beacon threads report events here; the circuit itself
//! hears back through its [`CircuitPeer`] implementation.

use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::sync::{CallbackGuard, CallbackLock, CircuitMutex, LockConfig};
use crate::timer::TimerQueue;
use crate::trace::{debug, info};
use crate::watchdog::{
    BeaconTracker, BeaconVerdict, CircuitPeer, RecvStatus, RecvWatchdog, SendStatus,
    SendWatchdog, WatchdogConfig, WatchdogError,
};

/// Liveness state for one virtual circuit.
pub struct CircuitLiveness {
    callbacks: Arc<CallbackLock>,
    recv: Arc<RecvWatchdog>,
    send: Arc<SendWatchdog>,
    beacons: CircuitMutex<BeaconTracker>,
}

impl CircuitLiveness {
    /// Creates stopped watchdogs for a circuit; call
    /// [`Self::connect_notify`] once the circuit is up.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or `queue` cannot supply two timers.
    pub fn new(
        peer: Arc<dyn CircuitPeer>,
        queue: &dyn TimerQueue,
        config: &WatchdogConfig,
    ) -> Result<Self, WatchdogError> {
        Self::with_lock_config(peer, queue, config, LockConfig::default())
    }

    /// Like [`Self::new`], with explicit callback lock options.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or `queue` cannot supply two timers.
    pub fn with_lock_config(
        peer: Arc<dyn CircuitPeer>,
        queue: &dyn TimerQueue,
        config: &WatchdogConfig,
        lock: LockConfig,
    ) -> Result<Self, WatchdogError> {
        config.validate()?;
        let callbacks = Arc::new(CallbackLock::with_config((), lock));
        let recv = RecvWatchdog::new(Arc::clone(&peer), Arc::clone(&callbacks), queue, config)?;
        let send = SendWatchdog::new(
            Arc::clone(&peer),
            Arc::clone(&callbacks),
            recv.clone(),
            queue,
            config,
        )?;
        info!(
            host = %peer.host_name(),
            period_secs = config.period.as_secs_f64(),
            echo_secs = config.echo_timeout.as_secs_f64(),
            "circuit liveness created"
        );
        Ok(Self {
            callbacks,
            recv,
            send,
            beacons: CircuitMutex::new(BeaconTracker::new()),
        })
    }

    /// The receive watchdog.
    #[must_use]
    pub fn recv(&self) -> &Arc<RecvWatchdog> {
        &self.recv
    }

    /// The send watchdog.
    #[must_use]
    pub fn send(&self) -> &Arc<SendWatchdog> {
        &self.send
    }

    /// The lock serializing upcalls into the circuit.
    #[must_use]
    pub fn callback_lock(&self) -> &Arc<CallbackLock> {
        &self.callbacks
    }

    /// The circuit connected.
    pub fn connect_notify(&self) {
        self.recv.connect_notify();
    }

    /// An application message arrived.
    pub fn message_arrival_notify(&self, now: Instant) {
        self.recv.message_arrival_notify(now);
    }

    /// An echo response arrived; takes the callback lock for the upcall.
    pub fn probe_response_notify(&self, now: Instant) {
        let mut cb = self.callbacks.lock();
        self.recv.probe_response_notify(&mut cb, now);
    }

    /// An echo response arrived while the caller already holds the callback lock.
    ///
    /// # Panics
    ///
    /// Panics if `cb` was not taken from [`Self::callback_lock`].
    pub fn probe_response_notify_locked(&self, cb: &mut CallbackGuard<'_>, now: Instant) {
        self.recv.probe_response_notify(cb, now);
    }

    /// A beacon from this circuit's server arrived; classifies it by cadence.
    pub fn beacon_notify(&self, now: Instant) -> BeaconVerdict {
        let verdict = self.beacons.lock().observe(now);
        match verdict {
            BeaconVerdict::Regular => self.recv.beacon_arrival_notify(now),
            BeaconVerdict::Anomaly => self.recv.beacon_anomaly_notify(),
        }
        verdict
    }

    /// A send is about to block.
    pub fn send_start_notify(&self, now: Instant) {
        self.send.send_start_notify(now);
    }

    /// A blocked send moved some bytes.
    pub fn send_progress_notify(&self, now: Instant) {
        self.send.send_progress_notify(now);
    }

    /// A send finished.
    pub fn send_complete_notify(&self) {
        self.send.send_complete_notify();
    }

    /// Stops both watchdogs.
    pub fn cancel(&self) {
        self.send.cancel();
        self.recv.cancel();
        debug!("circuit liveness canceled");
    }

    /// Time until the receive watchdog next fires.
    #[must_use]
    pub fn recv_delay(&self) -> Option<Duration> {
        self.recv.delay()
    }

    /// Receive-side flags.
    #[must_use]
    pub fn recv_status(&self) -> RecvStatus {
        self.recv.status()
    }

    /// Send-side flags.
    #[must_use]
    pub fn send_status(&self) -> SendStatus {
        self.send.status()
    }

    /// Both watchdogs' descriptions, plus the beacon estimate at `level > 1`.
    #[must_use]
    pub fn show(&self, level: u32) -> String {
        let mut out = self.recv.show(level);
        out.push_str(&self.send.show(level));
        if level > 1 {
            match self.beacons.lock().average_period() {
                Some(avg) => {
                    out.push_str(&format!("\tbeacon period {:.6}\n", avg.as_secs_f64()));
                }
                None => out.push_str("\tbeacon period unknown\n"),
            }
        }
        out
    }
}
