//! User-facing callback contracts.

use crate::error::Error;
use crate::sock::Address;
use crate::time::Time;
use std::os::fd::{OwnedFd, RawFd};

/// Metadata delivered with each accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct AcceptInfo {
    /// When the connection entered dispatch on the primary loop. For
    /// queued deliveries this is the enqueue instant; the difference from
    /// the callback's own clock is the queue time.
    pub enqueue_time: Time,
}

/// A sink for accepted connections.
///
/// `connection_accepted` runs on the callback's declared target loop, or
/// on the primary loop when none was declared. Ownership of the
/// descriptor transfers to the callback; dropping it closes the
/// connection.
pub trait AcceptCallback: Send + Sync {
    /// The callback has been installed and accepting is about to reach it.
    fn accept_started(&self) {}

    /// The callback has been removed (or the listener stopped); no
    /// further connections will be delivered.
    fn accept_stopped(&self) {}

    /// One accepted connection, delivered exactly once.
    fn connection_accepted(&self, conn: OwnedFd, peer: Address, info: AcceptInfo);

    /// An accept-path error associated with the listening socket.
    fn accept_error(&self, error: Error);
}

/// Optional observer of connection-level events, for telemetry.
///
/// All methods default to no-ops. Descriptors are passed raw and only for
/// identification; the observer must not close or retain them.
pub trait ConnectionEventCallback: Send + Sync {
    /// The kernel handed us a connection.
    fn on_connection_accepted(&self, _fd: RawFd, _peer: &Address) {}

    /// `accept(2)` failed with `errno`.
    fn on_connection_accept_error(&self, _errno: i32) {}

    /// A connection was closed without delivery; `reason` says why.
    fn on_connection_dropped(&self, _fd: RawFd, _peer: &Address, _reason: &str) {}

    /// A connection was queued for a remote acceptor.
    fn on_connection_enqueued_for_acceptor(&self, _fd: RawFd, _peer: &Address) {}

    /// A remote acceptor dequeued a connection for delivery.
    fn on_connection_dequeued_by_acceptor(&self, _fd: RawFd, _peer: &Address) {}

    /// Accept backoff began; listening sockets are unregistered.
    fn on_backoff_started(&self) {}

    /// Accept backoff ended.
    fn on_backoff_ended(&self) {}

    /// The backoff timer could not be armed; accepting continues.
    fn on_backoff_error(&self) {}
}
