//! Shared test peer for the integration tests.

#![allow(dead_code)]

use std::fmt;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

use parking_lot::Mutex;
use vigil::{CallbackGuard, CircuitPeer};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        vigil::init_tracing();
    });
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Echo,
    Responsive,
    RecvTimeout,
    SendTimeout,
    Diagnostic(String),
}

/// Circuit stand-in that records every upcall.
pub struct TestPeer {
    events: Mutex<Vec<Event>>,
    echoes: AtomicUsize,
    receive_busy: AtomicBool,
    stream: Option<TcpStream>,
}

impl TestPeer {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            echoes: AtomicUsize::new(0),
            receive_busy: AtomicBool::new(false),
            stream: None,
        }
    }

    /// A peer whose transport probe asks the kernel about `stream`.
    pub fn with_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            ..Self::new()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn echoes(&self) -> usize {
        self.echoes.load(Ordering::SeqCst)
    }

    pub fn set_receive_busy(&self, busy: bool) {
        self.receive_busy.store(busy, Ordering::SeqCst);
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl CircuitPeer for TestPeer {
    fn bytes_pending_at_transport(&self) -> bool {
        self.stream.as_ref().is_some_and(vigil::net::has_bytes_pending)
    }

    fn emit_diagnostic(&self, _cb: &CallbackGuard<'_>, message: fmt::Arguments<'_>) {
        self.push(Event::Diagnostic(message.to_string()));
    }

    fn notify_receive_timeout(&self, _cb: &CallbackGuard<'_>) {
        self.push(Event::RecvTimeout);
    }

    fn request_echo_probe(&self) -> bool {
        self.echoes.fetch_add(1, Ordering::SeqCst);
        self.push(Event::Echo);
        true
    }

    fn notify_responsive(&self, _cb: &CallbackGuard<'_>) {
        self.push(Event::Responsive);
    }

    fn host_name(&self) -> String {
        "test-ioc:5064".into()
    }

    fn receive_thread_is_busy(&self) -> bool {
        self.receive_busy.load(Ordering::SeqCst)
    }

    fn notify_send_timeout(&self, _cb: &CallbackGuard<'_>) {
        self.push(Event::SendTimeout);
    }
}
