//! Contract between the watchdogs and the circuit that owns them.

use core::fmt;

use crate::sync::CallbackGuard;

/// Operations a watchdog needs from the circuit it supervises.
///
/// Methods taking a [`CallbackGuard`] are upcalls made with the callback lock
/// held; the guard is proof of that, not something to release. Methods are
/// called while a watchdog's state lock may be held, so implementations must
/// not call back into the same watchdog synchronously.
pub trait CircuitPeer: Send + Sync {
    /// Whether inbound bytes are queued in the OS for this circuit's socket.
    fn bytes_pending_at_transport(&self) -> bool;

    /// Reports a human-readable diagnostic about the circuit.
    fn emit_diagnostic(&self, cb: &CallbackGuard<'_>, message: fmt::Arguments<'_>);

    /// The server stopped answering echo probes; the circuit should disconnect.
    ///
    /// Called once per probe timeout, with both the callback lock and the
    /// watchdog's state lock held.
    fn notify_receive_timeout(&self, cb: &CallbackGuard<'_>);

    /// Queues an echo request. Returns whether a probe is now outstanding.
    fn request_echo_probe(&self) -> bool;

    /// An echo response arrived on time; a circuit marked unresponsive may be
    /// marked responsive again.
    fn notify_responsive(&self, cb: &CallbackGuard<'_>);

    /// Name of the server, for diagnostics.
    fn host_name(&self) -> String;

    /// Whether the local receive thread is busy processing inbound messages.
    ///
    /// A send stall while the client itself is the bottleneck is not evidence
    /// against the server.
    fn receive_thread_is_busy(&self) -> bool {
        false
    }

    /// A send made no progress for the send watchdog's period.
    fn notify_send_timeout(&self, cb: &CallbackGuard<'_>) {
        let _ = cb;
    }
}
