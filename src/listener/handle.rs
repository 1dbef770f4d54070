//! One listening socket.

use crate::error::Result;
use crate::event_loop::{EventLoop, ReadToken, ReadyCallback};
use crate::sock::AddressFamily;
use crate::tracing_compat::warn;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

/// A listening descriptor plus its readiness registration.
///
/// The registration state is allowed to diverge from the listener's
/// desired-accepting flag (backoff, quiescence); the listener's state
/// machine decides when to register and unregister.
pub(crate) struct ListenHandle {
    fd: OwnedFd,
    family: AddressFamily,
    token: Option<ReadToken>,
}

impl ListenHandle {
    pub(crate) fn new(fd: OwnedFd, family: AddressFamily) -> Self {
        Self {
            fd,
            family,
            token: None,
        }
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub(crate) fn borrowed(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub(crate) fn family(&self) -> AddressFamily {
        self.family
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.token.is_some()
    }

    /// Registers for persistent READ readiness. Idempotent.
    pub(crate) fn register(
        &mut self,
        event_loop: &Arc<dyn EventLoop>,
        ready: ReadyCallback,
    ) -> Result<()> {
        if self.token.is_none() {
            self.token = Some(event_loop.register_read(self.raw(), ready)?);
        }
        Ok(())
    }

    /// Removes the READ registration, if any.
    pub(crate) fn unregister(&mut self, event_loop: &Arc<dyn EventLoop>) {
        if let Some(token) = self.token.take() {
            if let Err(e) = event_loop.deregister_read(token) {
                warn!(error = %e, fd = self.raw(), "failed to deregister listening socket");
            }
        }
    }

    pub(crate) fn into_fd(self) -> OwnedFd {
        self.fd
    }
}
