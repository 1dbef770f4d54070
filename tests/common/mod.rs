//! Shared fixtures for listener integration tests.
//!
//! Recording implementations of the callback contracts plus a small
//! harness that binds a real loopback socket driven by a [`LabLoop`].

#![allow(dead_code)]

use std::net::{SocketAddr, TcpStream};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use turnstile::{
    AcceptCallback, AcceptInfo, Address, ConnectionEventCallback, Error, LabLoop, Listener,
    ListenerConfig, ShutdownSet,
};

/// An event observed by a [`RecordingCallback`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    Started,
    Stopped,
    Accepted { peer: String },
    Error { errno: Option<i32> },
}

/// An [`AcceptCallback`] that records everything and keeps accepted
/// connections open.
pub struct RecordingCallback {
    events: Mutex<Vec<CallbackEvent>>,
    conns: Mutex<Vec<OwnedFd>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            conns: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn accepted_peers(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CallbackEvent::Accepted { peer } => Some(peer),
                _ => None,
            })
            .collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted_peers().len()
    }
}

impl AcceptCallback for RecordingCallback {
    fn accept_started(&self) {
        self.events.lock().expect("events lock").push(CallbackEvent::Started);
    }

    fn accept_stopped(&self) {
        self.events.lock().expect("events lock").push(CallbackEvent::Stopped);
    }

    fn connection_accepted(&self, conn: OwnedFd, peer: Address, _info: AcceptInfo) {
        self.events
            .lock()
            .expect("events lock")
            .push(CallbackEvent::Accepted {
                peer: peer.to_string(),
            });
        self.conns.lock().expect("conns lock").push(conn);
    }

    fn accept_error(&self, error: Error) {
        self.events.lock().expect("events lock").push(CallbackEvent::Error {
            errno: error.errno(),
        });
    }
}

/// An event observed by a [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Accepted,
    AcceptError(i32),
    Dropped { reason: String },
    Enqueued,
    Dequeued,
    BackoffStarted,
    BackoffEnded,
    BackoffError,
}

/// A [`ConnectionEventCallback`] that records everything.
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn dropped_reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Dropped { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, event: &ObserverEvent) -> bool {
        self.events().contains(event)
    }

    fn push(&self, event: ObserverEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl ConnectionEventCallback for RecordingObserver {
    fn on_connection_accepted(&self, _fd: RawFd, _peer: &Address) {
        self.push(ObserverEvent::Accepted);
    }

    fn on_connection_accept_error(&self, errno: i32) {
        self.push(ObserverEvent::AcceptError(errno));
    }

    fn on_connection_dropped(&self, _fd: RawFd, _peer: &Address, reason: &str) {
        self.push(ObserverEvent::Dropped {
            reason: reason.to_string(),
        });
    }

    fn on_connection_enqueued_for_acceptor(&self, _fd: RawFd, _peer: &Address) {
        self.push(ObserverEvent::Enqueued);
    }

    fn on_connection_dequeued_by_acceptor(&self, _fd: RawFd, _peer: &Address) {
        self.push(ObserverEvent::Dequeued);
    }

    fn on_backoff_started(&self) {
        self.push(ObserverEvent::BackoffStarted);
    }

    fn on_backoff_ended(&self) {
        self.push(ObserverEvent::BackoffEnded);
    }

    fn on_backoff_error(&self) {
        self.push(ObserverEvent::BackoffError);
    }
}

/// A [`ShutdownSet`] that records add/close order and really closes the
/// descriptors handed to it.
pub struct RecordingShutdownSet {
    added: Mutex<Vec<RawFd>>,
    closed: Mutex<Vec<RawFd>>,
}

impl RecordingShutdownSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            added: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        })
    }

    pub fn added(&self) -> Vec<RawFd> {
        self.added.lock().expect("added lock").clone()
    }

    pub fn closed(&self) -> Vec<RawFd> {
        self.closed.lock().expect("closed lock").clone()
    }
}

impl ShutdownSet for RecordingShutdownSet {
    fn add(&self, fd: RawFd) {
        self.added.lock().expect("added lock").push(fd);
    }

    fn remove(&self, fd: RawFd) {
        self.added.lock().expect("added lock").retain(|f| *f != fd);
    }

    fn close(&self, fd: RawFd) {
        self.closed.lock().expect("closed lock").push(fd);
        // Ownership transferred to the set; close for real.
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

/// Binds a loopback TCP listener driven by `lab` and returns it with its
/// bound address.
pub fn tcp_listener(lab: &Arc<LabLoop>, config: ListenerConfig) -> (Listener, SocketAddr) {
    let listener = Listener::new(lab.clone(), config);
    listener
        .bind(&Address::Inet("127.0.0.1:0".parse().expect("loopback")))
        .expect("bind");
    listener.listen(16).expect("listen");
    let addr = match listener.local_address().expect("local address") {
        Address::Inet(sa) => sa,
        other => panic!("unexpected local address {other}"),
    };
    (listener, addr)
}

/// Connects a client and returns it; the connection sits in the kernel
/// accept queue until the listener drains it.
pub fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).expect("client connect")
}

/// A unique path for a unix socket test.
pub fn unix_socket_path(tag: &str) -> std::path::PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "turnstile-{}-{}-{}.sock",
        tag,
        std::process::id(),
        n
    ))
}
