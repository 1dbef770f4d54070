//! Turnstile: an event-driven server socket core.
//!
//! A non-blocking listener that accepts incoming TCP/UNIX connections on
//! a primary event loop and dispatches them across consumer loops, with
//! admission control, overload protection, and failure recovery.
//!
//! # Core Pieces
//!
//! - [`Listener`]: the accept/dispatch state machine (bind, listen,
//!   start/pause/stop, and the per-wake accept pipeline)
//! - [`AcceptCallback`] / [`ConnectionEventCallback`]: user-facing sinks
//!   for connections and connection-level telemetry
//! - [`NotifyQueue`]: bounded cross-thread FIFO feeding consumer loops
//! - [`EventLoop`]: the contract an external loop implements to drive
//!   the listener (readiness, timers, thread-affine tasks)
//! - [`lab`]: a deterministic event loop with virtual time for tests
//!
//! # Guarantees
//!
//! - **Exclusive dispatch**: every accepted descriptor is delivered to
//!   exactly one callback or closed, never leaked or double-delivered
//! - **Bounded wakes**: the pipeline accepts at most a configured number
//!   of connections per readiness event and never blocks
//! - **Overload protection**: a probabilistic admission filter recovers
//!   smoothly after overload; saturated consumer queues shed load
//! - **Failure recovery**: descriptor exhaustion backs accepting off for
//!   a fixed interval without losing the desired-accepting state
//!
//! # Module Structure
//!
//! - [`listener`]: the façade and its callbacks, config, dispatch table
//! - [`event_loop`]: the loop contract
//! - [`queue`]: the notification queue
//! - [`sock`]: address types and raw socket operations
//! - [`shutdown`]: process shutdown registry contract
//! - [`lab`]: deterministic loop for tests
//! - [`error`], [`time`], [`util`]: ambient support

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod error;
pub mod event_loop;
pub mod lab;
pub mod listener;
pub mod queue;
pub mod shutdown;
pub mod sock;
#[cfg(feature = "test-util")]
pub mod test_utils;
pub mod time;
pub mod tracing_compat;
pub mod util;

pub use error::{Error, ErrorKind, Result};
pub use event_loop::{EventLoop, ReadToken, ReadyCallback, Task, TimerId};
pub use lab::{LabClock, LabLoop};
pub use listener::{
    AcceptCallback, AcceptInfo, ConnectionEventCallback, Listener, ListenerConfig,
};
pub use queue::NotifyQueue;
pub use shutdown::ShutdownSet;
pub use sock::{Address, AddressFamily};
pub use time::Time;
pub use util::DetRng;
