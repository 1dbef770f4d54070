//! Event loop contract.
//!
//! The listener core does not run its own event loop. It is driven by an
//! external loop that supplies four capabilities:
//!
//! | Capability | Used for |
//! |------------|----------|
//! | Thread affinity | asserting that public mutators run on the primary loop |
//! | Task execution | cross-thread delivery to consumer loops |
//! | One-shot timers | the accept backoff timer |
//! | READ registration | readiness notifications for listening sockets |
//!
//! Registrations are **persistent**: the loop keeps delivering readiness
//! callbacks for a registered descriptor until it is explicitly
//! deregistered. The loop also exposes a logical clock ([`EventLoop::now`])
//! so deadline arithmetic works identically on wall-clock loops and on the
//! virtual-time [`LabLoop`](crate::lab::LabLoop) used in tests.
//!
//! Loop identity is `Arc` identity: two handles refer to the same loop iff
//! they are clones of the same `Arc`.

use crate::error::Result;
use crate::time::Time;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work executed on a loop's thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A readiness callback, invoked on the loop's thread each time the
/// registered descriptor becomes readable.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Identifier for a scheduled one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Identifier for a READ registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadToken(pub u64);

/// An event loop that can drive a [`Listener`](crate::listener::Listener).
pub trait EventLoop: Send + Sync {
    /// Returns true when called from this loop's thread.
    fn is_in_loop_thread(&self) -> bool;

    /// Enqueues a task for execution on this loop's thread.
    ///
    /// Returns `false` if the loop is no longer accepting work; the task is
    /// dropped in that case.
    fn run_in_loop(&self, task: Task) -> bool;

    /// Schedules a one-shot timer firing `delay` from now on this loop's
    /// thread.
    fn schedule_timer(&self, delay: Duration, task: Task) -> Result<TimerId>;

    /// Cancels a previously scheduled timer. Cancelling a timer that has
    /// already fired is a no-op.
    fn cancel_timer(&self, timer: TimerId);

    /// Registers `fd` for persistent READ readiness notifications.
    fn register_read(&self, fd: RawFd, ready: ReadyCallback) -> Result<ReadToken>;

    /// Removes a READ registration.
    fn deregister_read(&self, token: ReadToken) -> Result<()>;

    /// Returns the loop's current logical time.
    fn now(&self) -> Time;

    /// Returns the NAPI id of the network receive path this loop is
    /// affine to, if the platform and loop expose one.
    fn napi_id(&self) -> Option<u32> {
        None
    }
}

/// Returns true when `a` and `b` are handles to the same loop.
#[must_use]
pub fn same_loop(a: &Arc<dyn EventLoop>, b: &Arc<dyn EventLoop>) -> bool {
    Arc::ptr_eq(a, b)
}
