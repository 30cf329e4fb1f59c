//! Liveness scenarios for one circuit, driven on a virtual clock.
//!
//! Every test uses a 30s idle period and a 4s echo timeout so the timelines
//! read directly in seconds since connect.

mod common;

use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;
use vigil::{
    BeaconVerdict, CircuitLiveness, ConfigError, ManualTimerQueue, TimerError, TimerQueue,
    WatchdogConfig, WatchdogError,
};

use common::{init_test_tracing, Event, TestPeer};

struct Circuit {
    origin: Instant,
    queue: ManualTimerQueue,
    peer: Arc<TestPeer>,
    liveness: CircuitLiveness,
}

impl Circuit {
    fn connect() -> Self {
        init_test_tracing();
        let origin = Instant::now();
        let queue = ManualTimerQueue::new(origin);
        let peer = Arc::new(TestPeer::new());
        let config = WatchdogConfig::default()
            .with_period(Duration::from_secs(30))
            .with_echo_timeout(Duration::from_secs(4))
            .with_send_period(Duration::from_secs(10));
        let liveness = CircuitLiveness::new(peer.clone(), &queue, &config).unwrap();
        liveness.connect_notify();
        Self {
            origin,
            queue,
            peer,
            liveness,
        }
    }

    fn t(&self, secs: u64) -> Instant {
        self.origin + Duration::from_secs(secs)
    }

    fn run_to(&self, secs: u64) -> usize {
        self.queue.advance_to(self.t(secs))
    }

    fn next(&self) -> Option<u64> {
        self.queue
            .next_expiration()
            .map(|at| at.saturating_duration_since(self.origin).as_secs())
    }

    /// Exactly one of the two receive states holds.
    fn probing(&self) -> bool {
        let status = self.liveness.recv_status();
        assert!(
            !status.probe_timeout_detected || status.probe_response_pending,
            "timeout flag without a pending probe: {status:?}"
        );
        status.probe_response_pending
    }
}

#[test]
fn on_time_probe_response_restores_idle_countdown() {
    let c = Circuit::connect();
    assert_eq!(c.next(), Some(30));

    assert_eq!(c.run_to(30), 1);
    assert!(c.probing());
    assert_eq!(c.peer.echoes(), 1);
    assert_eq!(c.next(), Some(34));

    c.liveness.probe_response_notify(c.t(33));
    assert!(!c.probing());
    assert_eq!(c.next(), Some(63));
    assert_eq!(c.peer.count(&Event::Responsive), 1);
    assert_eq!(c.peer.count(&Event::RecvTimeout), 0);
}

#[test]
fn unanswered_probe_declares_timeout_once() {
    let c = Circuit::connect();
    assert_eq!(c.run_to(34), 2);

    let status = c.liveness.recv_status();
    assert!(status.probe_response_pending);
    assert!(status.probe_timeout_detected);
    assert_eq!(c.peer.count(&Event::RecvTimeout), 1);
    assert_eq!(c.next(), None);

    assert_eq!(c.run_to(600), 0);
    assert_eq!(c.peer.count(&Event::RecvTimeout), 1);
}

#[test]
fn late_response_sends_fresh_probe() {
    let c = Circuit::connect();
    c.run_to(34);
    c.liveness.probe_response_notify(c.t(36));

    let status = c.liveness.recv_status();
    assert!(status.probe_response_pending);
    assert!(!status.probe_timeout_detected);
    assert_eq!(c.peer.echoes(), 2);
    assert_eq!(c.next(), Some(40));

    c.liveness.probe_response_notify(c.t(38));
    assert!(!c.probing());
    assert_eq!(c.next(), Some(68));
}

#[test]
fn traffic_keeps_circuit_quiet() {
    let c = Circuit::connect();
    for s in (10..=300).step_by(10) {
        c.liveness.message_arrival_notify(c.t(s));
        assert_eq!(c.run_to(s), 0);
    }
    assert_eq!(c.peer.echoes(), 0);
    assert_eq!(c.next(), Some(330));
}

#[test]
fn message_during_probe_leaves_probe_pending() {
    let c = Circuit::connect();
    c.run_to(30);
    c.liveness.message_arrival_notify(c.t(31));
    assert!(c.probing());
    assert_eq!(c.next(), Some(34));
}

#[test]
fn regular_beacons_keep_idle_circuit_alive_after_first_message() {
    let c = Circuit::connect();

    // Trust starts revoked: beacons before any message do not rearm.
    assert_eq!(c.liveness.beacon_notify(c.t(5)), BeaconVerdict::Regular);
    assert_eq!(c.next(), Some(30));

    c.liveness.message_arrival_notify(c.t(6));
    for s in [20, 35, 50, 65, 80] {
        assert_eq!(c.run_to(s), 0);
        assert_eq!(c.liveness.beacon_notify(c.t(s)), BeaconVerdict::Regular);
        assert_eq!(c.next(), Some(s + 30));
    }
    assert_eq!(c.peer.echoes(), 0);
}

#[test]
fn irregular_beacon_revokes_trust_until_next_message() {
    let c = Circuit::connect();
    c.liveness.message_arrival_notify(c.t(0));
    c.liveness.beacon_notify(c.t(1));
    c.liveness.beacon_notify(c.t(11));
    assert_eq!(c.next(), Some(41));

    // Server restart: a beacon well inside the usual period.
    assert_eq!(c.liveness.beacon_notify(c.t(13)), BeaconVerdict::Anomaly);
    assert!(c.liveness.recv_status().beacon_anomaly);
    c.liveness.beacon_notify(c.t(20));
    assert_eq!(c.next(), Some(41), "distrusted beacon must not rearm");

    c.liveness.message_arrival_notify(c.t(25));
    assert!(!c.liveness.recv_status().beacon_anomaly);
    c.liveness.beacon_notify(c.t(27));
    assert_eq!(c.next(), Some(57));
}

#[test]
fn beacon_during_probe_does_not_rearm() {
    let c = Circuit::connect();
    c.liveness.message_arrival_notify(c.t(0));
    c.run_to(30);
    c.liveness.beacon_notify(c.t(31));
    assert_eq!(c.next(), Some(34));
}

#[test]
fn send_backlog_extends_probe_deadline() {
    let c = Circuit::connect();
    c.run_to(30);
    let anomaly = c.liveness.recv_status().beacon_anomaly;

    c.liveness.send_start_notify(c.t(31));
    c.liveness.send_progress_notify(c.t(33));
    assert_eq!(c.liveness.recv_delay(), Some(Duration::from_secs(7)));
    assert_eq!(c.liveness.recv_status().beacon_anomaly, anomaly);

    assert_eq!(c.run_to(36), 0);
    c.liveness.send_complete_notify();
    assert_eq!(c.run_to(37), 1);
    assert_eq!(c.peer.count(&Event::RecvTimeout), 1);
}

#[test]
fn stalled_send_probes_server() {
    let c = Circuit::connect();
    c.liveness.message_arrival_notify(c.t(1));
    c.liveness.send_start_notify(c.t(2));

    assert_eq!(c.run_to(12), 1);
    assert!(c.liveness.send_status().stall_detected);
    assert_eq!(c.peer.count(&Event::SendTimeout), 1);
    assert!(c.probing());
    assert_eq!(c.next(), Some(16));

    c.liveness.probe_response_notify(c.t(14));
    c.liveness.send_complete_notify();
    assert!(!c.probing());
    assert!(!c.liveness.send_status().send_in_progress);
    assert_eq!(c.next(), Some(44));
}

#[test]
fn busy_receive_thread_defers_send_stall() {
    let c = Circuit::connect();
    c.liveness.message_arrival_notify(c.t(0));
    c.peer.set_receive_busy(true);
    c.liveness.send_start_notify(c.t(0));

    assert_eq!(c.run_to(20), 2);
    assert!(!c.liveness.send_status().stall_detected);
    assert_eq!(c.peer.echoes(), 0);
}

#[test]
fn cancel_stops_everything() {
    let c = Circuit::connect();
    c.liveness.send_start_notify(c.t(0));
    c.liveness.cancel();
    c.liveness.cancel();
    assert_eq!(c.liveness.recv_delay(), None);
    assert_eq!(c.liveness.send().delay(), None);
    assert_eq!(c.run_to(3600), 0);
}

#[test]
fn teardown_releases_both_timers_in_any_state() {
    for stop_at in [0, 30, 34] {
        let c = Circuit::connect();
        c.liveness.send_start_notify(c.t(0));
        c.run_to(stop_at);
        let Circuit {
            queue, liveness, ..
        } = c;
        assert_eq!(queue.live_timers(), 2);
        drop(liveness);
        assert_eq!(queue.live_timers(), 0, "stopped at {stop_at}");
        assert_eq!(queue.released_timers(), 2);
    }
}

#[test]
fn show_describes_both_watchdogs() {
    let c = Circuit::connect();
    c.run_to(34);
    let text = c.liveness.show(2);
    assert!(text.contains("Receive virtual circuit watchdog at "));
    assert!(text.contains("Send virtual circuit watchdog at "));
    assert!(text.contains("probe-response-timeout"));
    assert!(text.contains("beacon period unknown"));
}

#[test]
fn invalid_config_rejected_before_timers_are_taken() {
    let queue = ManualTimerQueue::new(Instant::now());
    let config = WatchdogConfig::default().with_period(Duration::ZERO);
    let err = CircuitLiveness::new(Arc::new(TestPeer::new()), &queue, &config)
        .err()
        .unwrap();
    assert!(matches!(err, WatchdogError::Config(_)));
    assert_eq!(queue.live_timers(), 0);
}

#[test]
fn oversized_period_rejected_instead_of_overflowing_deadline() {
    let queue = ManualTimerQueue::new(Instant::now());
    let config = WatchdogConfig::default().with_period(Duration::from_secs(u64::MAX / 4));
    let err = CircuitLiveness::new(Arc::new(TestPeer::new()), &queue, &config)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        WatchdogError::Config(ConfigError::TooLarge { name: "period", .. })
    ));
    assert_eq!(queue.live_timers(), 0);
}

struct EmptyQueue;

impl TimerQueue for EmptyQueue {
    fn create_timer(&self) -> Result<Box<dyn vigil::Timer>, TimerError> {
        Err(TimerError::Capacity { capacity: 0 })
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[test]
fn exhausted_queue_surfaces_timer_error() {
    let err = CircuitLiveness::new(
        Arc::new(TestPeer::new()),
        &EmptyQueue,
        &WatchdogConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        WatchdogError::Timer(TimerError::Capacity { capacity: 0 })
    ));
}
