//! Recording peer shared by the watchdog unit tests.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::peer::CircuitPeer;
use crate::sync::CallbackGuard;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PeerEvent {
    EchoRequested,
    Responsive,
    ReceiveTimeout,
    SendTimeout,
    Diagnostic(String),
}

pub(crate) struct RecordingPeer {
    events: Mutex<Vec<PeerEvent>>,
    bytes_pending: AtomicBool,
    accept_probes: AtomicBool,
    receive_busy: AtomicBool,
}

impl Default for RecordingPeer {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            bytes_pending: AtomicBool::new(false),
            accept_probes: AtomicBool::new(true),
            receive_busy: AtomicBool::new(false),
        }
    }
}

impl RecordingPeer {
    pub(crate) fn events(&self) -> Vec<PeerEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, event: &PeerEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub(crate) fn set_bytes_pending(&self, on: bool) {
        self.bytes_pending.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_accept_probes(&self, on: bool) {
        self.accept_probes.store(on, Ordering::SeqCst);
    }

    pub(crate) fn set_receive_busy(&self, on: bool) {
        self.receive_busy.store(on, Ordering::SeqCst);
    }

    fn push(&self, event: PeerEvent) {
        self.events.lock().push(event);
    }
}

impl CircuitPeer for RecordingPeer {
    fn bytes_pending_at_transport(&self) -> bool {
        self.bytes_pending.load(Ordering::SeqCst)
    }

    fn emit_diagnostic(&self, _cb: &CallbackGuard<'_>, message: fmt::Arguments<'_>) {
        self.push(PeerEvent::Diagnostic(message.to_string()));
    }

    fn notify_receive_timeout(&self, _cb: &CallbackGuard<'_>) {
        self.push(PeerEvent::ReceiveTimeout);
    }

    fn request_echo_probe(&self) -> bool {
        self.push(PeerEvent::EchoRequested);
        self.accept_probes.load(Ordering::SeqCst)
    }

    fn notify_responsive(&self, _cb: &CallbackGuard<'_>) {
        self.push(PeerEvent::Responsive);
    }

    fn host_name(&self) -> String {
        "ioc.test:5064".into()
    }

    fn receive_thread_is_busy(&self) -> bool {
        self.receive_busy.load(Ordering::SeqCst)
    }

    fn notify_send_timeout(&self, _cb: &CallbackGuard<'_>) {
        self.push(PeerEvent::SendTimeout);
    }
}
