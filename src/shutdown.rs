//! Process-wide socket shutdown registry contract.

use std::os::fd::RawFd;

/// A registry of sockets to be force-closed at process shutdown.
///
/// The listener holds the set weakly and keeps it informed of every
/// listening descriptor it owns: descriptors are [`add`](Self::add)ed as
/// they are set up and routed to [`close`](Self::close) at teardown.
///
/// # Ownership
///
/// `close(fd)` transfers ownership of the descriptor to the set: the
/// implementation closes it (immediately or at process shutdown) and the
/// caller must not touch it again.
pub trait ShutdownSet: Send + Sync {
    /// Records `fd` as owned by the server.
    fn add(&self, fd: RawFd);

    /// Forgets `fd` without closing it.
    fn remove(&self, fd: RawFd);

    /// Closes `fd`, taking ownership.
    fn close(&self, fd: RawFd);
}
