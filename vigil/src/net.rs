//! Socket-level probes for circuit peers.
//!
//! A [`CircuitPeer`](crate::watchdog::CircuitPeer) uses these to tell a dead
//! server from a client that stopped reading: if a probe times out while the
//! kernel still holds unread bytes for the circuit, the replies arrived and
//! nobody consumed them.

use std::io;
use std::os::fd::AsFd;

/// Number of bytes readable from `fd` without blocking (`FIONREAD`).
///
/// # Errors
///
/// Returns the OS error if the descriptor does not support the query.
pub fn bytes_pending<Fd: AsFd>(fd: Fd) -> io::Result<usize> {
    let pending = rustix::io::ioctl_fionread(fd)?;
    Ok(usize::try_from(pending).unwrap_or(usize::MAX))
}

/// Whether any inbound bytes are queued on `fd`.
///
/// Query failures count as "nothing pending"; the caller only uses the answer
/// to word a diagnostic.
pub fn has_bytes_pending<Fd: AsFd>(fd: Fd) -> bool {
    bytes_pending(fd).is_ok_and(|n| n > 0)
}
