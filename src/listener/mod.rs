//! The server socket: accept, admission control, dispatch.
//!
//! [`Listener`] owns one or more listening sockets bound to a *primary*
//! event loop and fans accepted connections out to registered
//! [`AcceptCallback`]s: inline when a callback runs on the primary loop,
//! through a remote acceptor's queue when it runs on a consumer loop.
//!
//! # Accepting discipline
//!
//! The *desired-accepting* flag set by [`start_accepting`] /
//! [`pause_accepting`] is allowed to diverge from the actual READ
//! registrations:
//!
//! | State | desired | callbacks | registered |
//! |------------|---------|-----------|------------|
//! | Idle       | no      | any       | no         |
//! | Registered | yes     | ≥ 1       | yes        |
//! | Quiesced   | yes     | 0         | no         |
//! | Backoff    | yes     | ≥ 1       | no (timer armed) |
//!
//! `EMFILE`/`ENFILE` from `accept(2)` enters Backoff: registrations are
//! dropped for one second, then restored. Only an explicit pause or stop
//! clears the desired flag.
//!
//! # Threading
//!
//! Every public mutator must run on the primary loop's thread and asserts
//! so on entry. The dispatch table, cursor, NAPI map, and rate state are
//! only touched from that thread; locks are held for field access only
//! and never across user callbacks, so callbacks may re-enter the
//! listener (remove themselves, stop accepting) freely.
//!
//! [`start_accepting`]: Listener::start_accepting
//! [`pause_accepting`]: Listener::pause_accepting

pub mod callback;
pub mod config;

pub(crate) mod acceptor;
pub(crate) mod dispatch;
mod handle;
mod rate;

pub use callback::{AcceptCallback, AcceptInfo, ConnectionEventCallback};
pub use config::ListenerConfig;

use crate::error::{Error, ErrorKind, Result};
use crate::event_loop::{same_loop, EventLoop, ReadyCallback, Task, TimerId};
use crate::sock::{self, Address, AddressFamily};
use crate::shutdown::ShutdownSet;
use crate::time::Time;
use crate::tracing_compat::{error, warn};
use acceptor::{AcceptMessage, RemoteAcceptor};
use dispatch::{DispatchTable, DispatchTarget};
use handle::ListenHandle;
use parking_lot::Mutex;
use rate::AcceptRate;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Fixed pause before accept registrations are restored after descriptor
/// exhaustion.
const BACKOFF_TIMEOUT: Duration = Duration::from_millis(1000);

/// Attempts for the dual-stack port-0 bind before giving up on the
/// IPv4/IPv6 same-port race.
const BIND_PORT_TRIES: u32 = 25;

/// Minimum interval between queue-overflow log lines.
const OVERFLOW_LOG_INTERVAL_NS: u64 = 1_000_000_000;

struct State {
    handles: Vec<ListenHandle>,
    pending_close: Vec<OwnedFd>,
    table: DispatchTable,
    /// Desired-accepting: survives backoff, cleared only by pause/stop.
    accepting: bool,
    backoff: Option<TimerId>,
    rate: AcceptRate,
    config: ListenerConfig,
    last_overflow_log: Option<Time>,
    #[cfg(feature = "test-util")]
    injected_accept_errnos: std::collections::VecDeque<i32>,
}

struct Inner {
    primary: Mutex<Option<Arc<dyn EventLoop>>>,
    state: Mutex<State>,
    observer: Mutex<Option<Arc<dyn ConnectionEventCallback>>>,
    shutdown_set: Mutex<Option<Weak<dyn ShutdownSet>>>,
    /// Read cross-thread for telemetry; relaxed counter.
    dropped: AtomicU64,
}

/// An asynchronous TCP/UNIX server socket.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<Inner>,
}

impl Listener {
    /// Creates a listener bound to a primary event loop.
    #[must_use]
    pub fn new(primary: Arc<dyn EventLoop>, config: ListenerConfig) -> Self {
        let now = primary.now();
        Self::build(Some(primary), config, now)
    }

    /// Creates a listener with no event loop attached yet. Binding and
    /// adoption work; accepting requires [`attach_loop`](Self::attach_loop).
    #[must_use]
    pub fn unattached(config: ListenerConfig) -> Self {
        Self::build(None, config, Time::ZERO)
    }

    fn build(primary: Option<Arc<dyn EventLoop>>, config: ListenerConfig, now: Time) -> Self {
        let rate = AcceptRate::new(
            config.accept_rate_adjust_speed,
            config.admission_seed,
            now,
        );
        Self {
            inner: Arc::new(Inner {
                primary: Mutex::new(primary),
                state: Mutex::new(State {
                    handles: Vec::new(),
                    pending_close: Vec::new(),
                    table: DispatchTable::new(),
                    accepting: false,
                    backoff: None,
                    rate,
                    config,
                    last_overflow_log: None,
                    #[cfg(feature = "test-util")]
                    injected_accept_errnos: std::collections::VecDeque::new(),
                }),
                observer: Mutex::new(None),
                shutdown_set: Mutex::new(None),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    // === Event loop attachment ===

    /// Returns the primary event loop, if attached.
    #[must_use]
    pub fn primary_loop(&self) -> Option<Arc<dyn EventLoop>> {
        self.inner.primary.lock().clone()
    }

    /// Attaches a primary event loop. Must be called on that loop's
    /// thread.
    pub fn attach_loop(&self, event_loop: Arc<dyn EventLoop>) -> Result<()> {
        assert!(
            event_loop.is_in_loop_thread(),
            "attach_loop must run on the new primary loop's thread"
        );
        let mut primary = self.inner.primary.lock();
        if primary.is_some() {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "listener already has an event loop attached",
            ));
        }
        *primary = Some(event_loop);
        Ok(())
    }

    /// Detaches the primary event loop. The listener must not be
    /// accepting.
    pub fn detach_loop(&self) -> Result<()> {
        self.check_loop_thread();
        if self.inner.state.lock().accepting {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "cannot detach the event loop while accepting",
            ));
        }
        let mut primary = self.inner.primary.lock();
        if primary.is_none() {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "listener has no event loop attached",
            ));
        }
        *primary = None;
        Ok(())
    }

    // === Observers and shutdown registry ===

    /// Installs (or clears) the connection-event observer.
    ///
    /// Remote acceptors capture the observer installed at
    /// `add_callback` time; changing it later affects the accept path
    /// and acceptors added afterwards.
    pub fn set_connection_event_callback(
        &self,
        observer: Option<Arc<dyn ConnectionEventCallback>>,
    ) {
        self.check_loop_thread();
        *self.inner.observer.lock() = observer;
    }

    /// Installs (or clears) the process shutdown registry, migrating
    /// already-owned descriptors between the old and new sets.
    pub fn set_shutdown_set(&self, set: Option<Arc<dyn ShutdownSet>>) {
        self.check_loop_thread();
        let old = self.shutdown_set();
        if let (Some(old), Some(new)) = (&old, &set) {
            if Arc::ptr_eq(old, new) {
                return;
            }
        }
        {
            let state = self.inner.state.lock();
            if let Some(old) = &old {
                for handle in &state.handles {
                    old.remove(handle.raw());
                }
            }
            if let Some(new) = &set {
                for handle in &state.handles {
                    new.add(handle.raw());
                }
            }
        }
        *self.inner.shutdown_set.lock() = set.map(|s| Arc::downgrade(&s));
    }

    // === Binding ===

    /// Binds a new socket to `addr`.
    pub fn bind(&self, addr: &Address) -> Result<()> {
        self.bind_internal(addr, None)
    }

    /// Binds a new socket to `addr` on a specific network device.
    pub fn bind_to_device(&self, addr: &Address, ifname: &str) -> Result<()> {
        self.bind_internal(addr, Some(ifname))
    }

    fn bind_internal(&self, addr: &Address, ifname: Option<&str>) -> Result<()> {
        self.check_loop_thread();
        let family = addr.family();

        let existing = {
            let state = self.inner.state.lock();
            match state.handles.len() {
                0 => None,
                1 => {
                    if state.handles[0].family() != family {
                        return Err(Error::with_context(
                            ErrorKind::InvalidArgument,
                            "attempted to bind an address with a different family than the existing socket",
                        ));
                    }
                    Some(())
                }
                _ => {
                    return Err(Error::with_context(
                        ErrorKind::InvalidArgument,
                        "attempted to bind with multiple sockets present",
                    ))
                }
            }
        };

        match existing {
            None => {
                let fd = self.create_socket(family)?;
                // A bind failure drops (closes) the new socket here.
                Self::bind_steps(fd.as_fd(), addr, ifname)?;
                self.inner
                    .state
                    .lock()
                    .handles
                    .push(ListenHandle::new(fd, family));
                Ok(())
            }
            Some(()) => {
                let state = self.inner.state.lock();
                Self::bind_steps(state.handles[0].borrowed(), addr, ifname)
            }
        }
    }

    fn bind_steps(
        fd: std::os::fd::BorrowedFd<'_>,
        addr: &Address,
        ifname: Option<&str>,
    ) -> Result<()> {
        if let Some(ifname) = ifname {
            sock::bind_device(fd, ifname).map_err(|e| {
                Error::io(ErrorKind::Bind, format!("failed to bind to device: {ifname}"), e)
            })?;
        }
        match sock::bind_addr(fd, addr) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => {
                return Err(Error::io(
                    ErrorKind::Bind,
                    format!("failed to bind to server socket: {addr}"),
                    e,
                ))
            }
        }
        Ok(())
    }

    /// Binds one new socket per address, all on the same port.
    pub fn bind_addrs(&self, addrs: &[IpAddr], port: u16) -> Result<()> {
        self.check_loop_thread();
        if addrs.is_empty() {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "no ip addresses were provided",
            ));
        }
        for ip in addrs {
            let addr = Address::Inet(SocketAddr::new(*ip, port));
            let family = addr.family();
            let fd = self.create_socket(family)?;
            Self::bind_steps(fd.as_fd(), &addr, None)?;
            self.inner
                .state
                .lock()
                .handles
                .push(ListenHandle::new(fd, family));
        }
        Ok(())
    }

    /// Binds wildcard sockets for every supported IP family.
    ///
    /// IPv6 binds first (with `V6ONLY`). With `port == 0` the IPv6
    /// socket's ephemeral port is reused for IPv4 so the listener exposes
    /// a single port; when another process wins that port in the interim,
    /// the whole sequence restarts, up to 25 attempts.
    pub fn bind_port(&self, port: u16) -> Result<()> {
        self.check_loop_thread();
        let mut tries = 1;
        loop {
            self.bind_wildcard(AddressFamily::Inet6, port)?;

            let mut v4_port = port;
            if port == 0 {
                let state = self.inner.state.lock();
                if state.handles.len() == 1 {
                    if let Some(p) = sock::local_address(state.handles[0].borrowed())?.port() {
                        v4_port = p;
                    }
                }
            }

            match self.bind_wildcard(AddressFamily::Inet, v4_port) {
                Ok(()) => break,
                Err(e) => {
                    let have_sockets = !self.inner.state.lock().handles.is_empty();
                    if port == 0 && have_sockets && tries != BIND_PORT_TRIES {
                        // Lost the same-port race; start over.
                        self.close_all_handles();
                        tries += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        if self.inner.state.lock().handles.is_empty() {
            return Err(Error::with_context(
                ErrorKind::Bind,
                "did not bind any server socket for port",
            ));
        }
        Ok(())
    }

    fn bind_wildcard(&self, family: AddressFamily, port: u16) -> Result<()> {
        let addr = match family {
            AddressFamily::Inet6 => {
                Address::Inet(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
            }
            _ => Address::Inet(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)),
        };
        let fd = match self.create_socket(family) {
            Ok(fd) => fd,
            // The kernel may not support this family at all.
            Err(e) if e.errno() == Some(libc::EAFNOSUPPORT) => return Ok(()),
            Err(e) => return Err(e),
        };
        if family == AddressFamily::Inet6 {
            sock::set_only_v6(fd.as_fd()).map_err(|e| {
                Error::io(ErrorKind::SocketSetup, "failed to set IPV6_V6ONLY", e)
            })?;
        }
        Self::bind_steps(fd.as_fd(), &addr, None)?;
        self.inner
            .state
            .lock()
            .handles
            .push(ListenHandle::new(fd, family));
        Ok(())
    }

    fn close_all_handles(&self) {
        let handles = std::mem::take(&mut self.inner.state.lock().handles);
        let shutdown_set = self.shutdown_set();
        for handle in handles {
            let fd = handle.into_fd();
            match &shutdown_set {
                Some(set) => set.close(fd.into_raw_fd()),
                None => drop(fd),
            }
        }
    }

    /// Adopts pre-existing descriptors (e.g. inherited from a
    /// supervisor), applying socket setup to each.
    pub fn adopt(&self, fds: Vec<OwnedFd>) -> Result<()> {
        self.check_loop_thread();
        if !self.inner.state.lock().handles.is_empty() {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "cannot adopt sockets into a listener that already has sockets",
            ));
        }
        for fd in fds {
            let family = sock::family_of(fd.as_fd())?;
            self.apply_setup(fd.as_fd(), family)?;
            self.inner
                .state
                .lock()
                .handles
                .push(ListenHandle::new(fd, family));
        }
        Ok(())
    }

    /// Starts listening on every bound socket.
    pub fn listen(&self, backlog: i32) -> Result<()> {
        self.check_loop_thread();
        let state = self.inner.state.lock();
        for handle in &state.handles {
            sock::listen(handle.borrowed(), backlog).map_err(|e| {
                Error::io(ErrorKind::Listen, "failed to listen on server socket", e)
            })?;
        }
        Ok(())
    }

    /// Local address of the first listening socket.
    pub fn local_address(&self) -> Result<Address> {
        let state = self.inner.state.lock();
        if state.handles.is_empty() {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                "listener has no bound sockets",
            ));
        }
        if state.handles.len() > 1 {
            warn!(
                sockets = state.handles.len(),
                "local_address() with multiple sockets returns only the first"
            );
        }
        sock::local_address(state.handles[0].borrowed())
    }

    /// Local addresses of all listening sockets, in creation order.
    pub fn local_addresses(&self) -> Result<Vec<Address>> {
        let state = self.inner.state.lock();
        state
            .handles
            .iter()
            .map(|h| sock::local_address(h.borrowed()))
            .collect()
    }

    // === Callbacks ===

    /// Adds an accept callback using the configured per-wake read bound.
    ///
    /// A `None` target runs the callback inline on the primary loop.
    pub fn add_callback(
        &self,
        callback: Arc<dyn AcceptCallback>,
        target: Option<Arc<dyn EventLoop>>,
    ) -> Result<()> {
        let max = self.inner.state.lock().config.max_callback_accept_per_wake;
        self.add_callback_with_max(callback, target, max)
    }

    /// Adds an accept callback with an explicit per-wake read bound for
    /// its queue consumer.
    pub fn add_callback_with_max(
        &self,
        callback: Arc<dyn AcceptCallback>,
        target: Option<Arc<dyn EventLoop>>,
        max_per_wake: u32,
    ) -> Result<()> {
        self.check_loop_thread();
        let run_start = {
            let state = self.inner.state.lock();
            state.accepting && state.table.is_empty()
        };
        let napi_id = target.as_ref().and_then(|t| t.napi_id());
        {
            let mut state = self.inner.state.lock();
            let entry = DispatchTarget {
                callback: Arc::clone(&callback),
                target: target.clone(),
                acceptor: None,
            };
            if let Some(id) = napi_id {
                state.table.insert_napi(id, entry.clone());
            }
            state.table.push(entry);
        }

        match &target {
            None => callback.accept_started(),
            Some(t) => {
                let observer = self.inner.observer.lock().clone();
                let acceptor = RemoteAcceptor::new(Arc::clone(&callback), observer, Arc::clone(t));
                if let Err(e) = acceptor.start(max_per_wake) {
                    let mut state = self.inner.state.lock();
                    state.table.pop_last();
                    if let Some(id) = napi_id {
                        state.table.remove_napi(id);
                    }
                    return Err(e);
                }
                let primary = self.inner.primary.lock().clone();
                let mut state = self.inner.state.lock();
                let index = state.table.len() - 1;
                state.table.set_consumer(index, Arc::clone(&acceptor));
                if let Some(id) = napi_id {
                    state.table.set_napi_consumer(id, acceptor);
                }
                if state.table.local_index().is_none() {
                    if let Some(primary) = &primary {
                        if same_loop(t, primary) {
                            state.table.set_local_index(index);
                        }
                    }
                }
            }
        }

        if run_start {
            self.start_accepting()?;
        }
        Ok(())
    }

    /// Removes the callback matching `(callback, target)`; a `None`
    /// target matches any entry with that callback.
    pub fn remove_callback(
        &self,
        callback: &Arc<dyn AcceptCallback>,
        target: Option<&Arc<dyn EventLoop>>,
    ) -> Result<()> {
        self.check_loop_thread();
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.table.find(callback, target) else {
                return Err(Error::new(ErrorKind::CallbackNotFound));
            };
            state.table.remove_napi_matching(callback, target);
            state.table.remove(index)
        };

        match removed.acceptor {
            Some(acceptor) => acceptor.stop(),
            None => removed.callback.accept_stopped(),
        }

        // Last callback gone: unregister, but keep desired-accepting.
        let unregister = {
            let state = self.inner.state.lock();
            state.accepting && state.table.is_empty()
        };
        if unregister {
            if let Some(event_loop) = self.primary_loop() {
                let mut state = self.inner.state.lock();
                for handle in &mut state.handles {
                    handle.unregister(&event_loop);
                }
            }
        }
        Ok(())
    }

    /// Number of registered accept callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.inner.state.lock().table.len()
    }

    // === Accepting ===

    /// Sets desired-accepting and registers every listening socket when
    /// callbacks are present.
    pub fn start_accepting(&self) -> Result<()> {
        self.check_loop_thread();
        let event_loop = self.require_loop()?;
        {
            let mut state = self.inner.state.lock();
            state.accepting = true;
            if state.table.is_empty() {
                // Wait for a callback before registering.
                return Ok(());
            }
        }
        Inner::register_handles(&self.inner, &event_loop)
    }

    /// Clears desired-accepting, unregisters every socket, and cancels a
    /// pending backoff.
    pub fn pause_accepting(&self) {
        self.check_loop_thread();
        let event_loop = self.primary_loop();
        let mut state = self.inner.state.lock();
        state.accepting = false;
        if let Some(event_loop) = &event_loop {
            for handle in &mut state.handles {
                handle.unregister(event_loop);
            }
            if let Some(timer) = state.backoff.take() {
                event_loop.cancel_timer(timer);
            }
        }
    }

    /// Whether the listener wants to accept (even while backing off).
    #[must_use]
    pub fn accepting(&self) -> bool {
        self.inner.state.lock().accepting
    }

    /// Stops accepting and closes every listening socket in reverse
    /// creation order.
    ///
    /// Descriptors route to the installed [`ShutdownSet`] when present.
    /// Otherwise `Some(how)` emits `shutdown(2)` and defers the close to
    /// [`close`](Self::close); `None` closes immediately. Idempotent.
    pub fn stop_accepting(&self, shutdown: Option<Shutdown>) -> Result<()> {
        self.check_loop_thread();
        let event_loop = self.primary_loop();
        let (mut handles, backoff, entries) = {
            let mut state = self.inner.state.lock();
            state.accepting = false;
            (
                std::mem::take(&mut state.handles),
                state.backoff.take(),
                state.table.take(),
            )
        };

        // Reverse creation order, so a restart re-binding the same
        // addresses cannot collide with a half-closed set.
        let shutdown_set = self.shutdown_set();
        while let Some(mut handle) = handles.pop() {
            if let Some(event_loop) = &event_loop {
                handle.unregister(event_loop);
            }
            let fd = handle.into_fd();
            if let Some(set) = &shutdown_set {
                set.close(fd.into_raw_fd());
            } else if let Some(how) = shutdown {
                if let Err(e) = sock::shutdown(fd.as_fd(), how) {
                    warn!(error = %e, "shutdown on listening socket failed");
                }
                self.inner.state.lock().pending_close.push(fd);
            }
        }
        if let (Some(event_loop), Some(timer)) = (&event_loop, backoff) {
            event_loop.cancel_timer(timer);
        }

        // The table was swapped out above, so a callback mutating the
        // listener from accept_stopped sees an empty table.
        for entry in entries {
            match entry.acceptor {
                Some(acceptor) => acceptor.stop(),
                None => entry.callback.accept_stopped(),
            }
        }
        Ok(())
    }

    /// Completes a two-phase shutdown: stops accepting (if not already
    /// stopped) and closes any sockets deferred by a
    /// `stop_accepting(Some(_))`.
    pub fn close(&self) -> Result<()> {
        self.stop_accepting(None)?;
        let pending = std::mem::take(&mut self.inner.state.lock().pending_close);
        drop(pending);
        Ok(())
    }

    // === Telemetry and tuning ===

    /// Connections dropped by admission control, overload, or deadline
    /// expiry. Relaxed counter, readable from any thread.
    #[must_use]
    pub fn dropped_connections(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> ListenerConfig {
        self.inner.state.lock().config.clone()
    }

    /// Sets the per-wake accept bound.
    pub fn set_max_accept_per_wake(&self, max: u32) {
        self.inner.state.lock().config.max_accept_per_wake = max;
    }

    /// Sets the queue depth cap for subsequent enqueues.
    pub fn set_max_queue_depth(&self, depth: usize) {
        self.inner.state.lock().config.max_queue_depth = depth;
    }

    /// Sets the per-message delivery deadline (`Duration::ZERO`
    /// disables).
    pub fn set_queue_timeout(&self, timeout: Duration) {
        self.inner.state.lock().config.queue_timeout = timeout;
    }

    /// Sets the admission filter recovery speed.
    pub fn set_rate_adjust_speed(&self, speed: f64) {
        let mut state = self.inner.state.lock();
        state.config.accept_rate_adjust_speed = speed;
        state.rate.set_adjust_speed(speed);
    }

    /// Applies `SO_REUSEADDR` to every current socket and records the
    /// setting for future ones. Fatal on setsockopt failure.
    pub fn set_reuse_addr(&self, on: bool) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.config.reuse_addr = on;
        for handle in &state.handles {
            sock::set_reuse_addr(handle.borrowed(), on).map_err(|e| {
                error!(error = %e, "failed to set SO_REUSEADDR on server socket");
                Error::io(
                    ErrorKind::SocketSetup,
                    "failed to set SO_REUSEADDR on server socket",
                    e,
                )
            })?;
        }
        Ok(())
    }

    /// Requests `SO_ZEROCOPY` on every current socket. Returns whether
    /// any socket accepted it.
    pub fn set_zero_copy(&self, on: bool) -> bool {
        let mut state = self.inner.state.lock();
        state.config.zero_copy = on;
        let mut any = false;
        for handle in &state.handles {
            if sock::set_zero_copy(handle.borrowed(), on).is_ok() {
                any = true;
            }
        }
        any
    }

    /// Enables or disables TOS reflection. Enabling requires Linux and
    /// turns on SYN saving for every current socket; failure is fatal.
    pub fn set_tos_reflect(&self, on: bool) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !cfg!(target_os = "linux") || !on {
            state.config.tos_reflect = false;
            return Ok(());
        }
        for handle in &state.handles {
            sock::enable_save_syn(handle.borrowed()).map_err(|e| {
                Error::io(ErrorKind::SocketSetup, "failed to enable TOS reflect", e)
            })?;
        }
        state.config.tos_reflect = true;
        Ok(())
    }

    /// Applies a TOS/traffic class to every current IP socket (0
    /// disables). Failure is fatal.
    pub fn set_listener_tos(&self, tos: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !cfg!(target_os = "linux") || tos == 0 {
            state.config.listener_tos = 0;
            return Ok(());
        }
        for handle in &state.handles {
            sock::set_tos(handle.borrowed(), handle.family(), tos).map_err(|e| {
                Error::io(ErrorKind::SocketSetup, "failed to set TOS for socket", e)
            })?;
        }
        state.config.listener_tos = tos;
        Ok(())
    }

    /// Queues an errno to be returned by the next accept attempt instead
    /// of calling `accept(2)`. Test instrumentation.
    #[cfg(feature = "test-util")]
    pub fn inject_accept_error(&self, errno: i32) {
        self.inner
            .state
            .lock()
            .injected_accept_errnos
            .push_back(errno);
    }

    // === Internals ===

    fn check_loop_thread(&self) {
        if let Some(event_loop) = self.inner.primary.lock().as_ref() {
            assert!(
                event_loop.is_in_loop_thread(),
                "listener methods must run on the primary event loop thread"
            );
        }
    }

    fn require_loop(&self) -> Result<Arc<dyn EventLoop>> {
        self.inner.primary.lock().clone().ok_or_else(|| {
            Error::with_context(ErrorKind::EventLoop, "listener has no event loop attached")
        })
    }

    fn shutdown_set(&self) -> Option<Arc<dyn ShutdownSet>> {
        self.inner.shutdown_set.lock().as_ref().and_then(Weak::upgrade)
    }

    fn create_socket(&self, family: AddressFamily) -> Result<OwnedFd> {
        let fd = sock::create(family)?;
        // Setup failure drops (closes) the new socket.
        self.apply_setup(fd.as_fd(), family)?;
        Ok(fd)
    }

    fn apply_setup(&self, fd: std::os::fd::BorrowedFd<'_>, family: AddressFamily) -> Result<()> {
        let config = self.inner.state.lock().config.clone();
        let shutdown_set = self.shutdown_set();
        sock::setup_socket(fd, family, &config, shutdown_set.as_ref())
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Listener")
            .field("sockets", &state.handles.len())
            .field("callbacks", &state.table.len())
            .field("accepting", &state.accepting)
            .field("backing_off", &state.backoff.is_some())
            .field("dropped", &self.inner.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl Inner {
    /// Registers every unregistered handle with a readiness callback
    /// that re-enters the accept pipeline.
    fn register_handles(inner: &Arc<Inner>, event_loop: &Arc<dyn EventLoop>) -> Result<()> {
        let weak = Arc::downgrade(inner);
        let mut state = inner.state.lock();
        for handle in &mut state.handles {
            if handle.is_registered() {
                continue;
            }
            let fd = handle.raw();
            let family = handle.family();
            let weak = weak.clone();
            let ready: ReadyCallback = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::handler_ready(&inner, fd, family);
                }
            });
            handle.register(event_loop, ready).map_err(|e| {
                Error::with_context(
                    ErrorKind::EventLoop,
                    format!("failed to register for accept events: {e}"),
                )
            })?;
        }
        Ok(())
    }

    /// The accept pipeline: drains the kernel queue for one READ wake.
    fn handler_ready(inner: &Arc<Inner>, fd: std::os::fd::RawFd, family: AddressFamily) {
        // `inner` is a strong reference for the whole wake; teardown from
        // within a callback cannot free state under us.
        let Some(event_loop) = inner.primary.lock().clone() else {
            return;
        };
        if inner.state.lock().table.is_empty() {
            return;
        }

        let mut iterations = 0;
        loop {
            let (max, tos_reflect) = {
                let state = inner.state.lock();
                (state.config.max_accept_per_wake, state.config.tos_reflect)
            };
            if iterations >= max {
                break;
            }
            iterations += 1;

            #[cfg(feature = "test-util")]
            let injected = inner.state.lock().injected_accept_errnos.pop_front();
            #[cfg(not(feature = "test-util"))]
            let injected: Option<i32> = None;

            let result = match injected {
                Some(errno) => Err(std::io::Error::from_raw_os_error(errno)),
                None => sock::accept_raw(fd, family),
            };
            let observer = inner.observer.lock().clone();

            match result {
                Ok((conn, peer)) => {
                    if let Some(observer) = &observer {
                        observer.on_connection_accepted(conn.as_raw_fd(), &peer);
                    }

                    if tos_reflect && family.is_inet() {
                        if let Err(e) = sock::reflect_tos(conn.as_fd(), family) {
                            error!(error = %e, "unable to reflect TOS onto accepted socket");
                        }
                    }

                    let now = event_loop.now();
                    let (admitted, rate_now) = {
                        let mut state = inner.state.lock();
                        let admitted = state.rate.admit(now);
                        (admitted, state.rate.current())
                    };
                    if admitted {
                        Inner::dispatch_socket(inner, &event_loop, conn, peer);
                    } else {
                        Inner::drop_connection(
                            inner,
                            observer.as_deref(),
                            conn,
                            &peer,
                            &format!(
                                "server is rate limiting new connections, current accept rate is {rate_now}"
                            ),
                        );
                    }
                }
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(0);
                    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                        // Kernel queue drained.
                        return;
                    }
                    if errno == libc::EMFILE || errno == libc::ENFILE {
                        error!(
                            errno,
                            "accept failed: out of file descriptors, entering accept backoff"
                        );
                        Inner::enter_backoff(inner, &event_loop);
                        Inner::dispatch_error(inner, &event_loop, "accept failed", errno);
                        if let Some(observer) = &observer {
                            observer.on_connection_accept_error(errno);
                        }
                        return;
                    }
                    Inner::dispatch_error(inner, &event_loop, "accept failed", errno);
                    if let Some(observer) = &observer {
                        observer.on_connection_accept_error(errno);
                    }
                    // Transient per-connection failure; keep draining.
                }
            }

            let keep_going = {
                let state = inner.state.lock();
                state.accepting && !state.table.is_empty()
            };
            if !keep_going {
                break;
            }
        }
    }

    /// Delivers one accepted connection to exactly one callback, or
    /// closes it.
    fn dispatch_socket(
        inner: &Arc<Inner>,
        event_loop: &Arc<dyn EventLoop>,
        conn: OwnedFd,
        peer: Address,
    ) {
        let enqueue_time = event_loop.now();
        let (queue_timeout, max_depth) = {
            let state = inner.state.lock();
            (state.config.queue_timeout, state.config.max_queue_depth)
        };
        let observer = inner.observer.lock().clone();

        // Queue-affinity short circuit: a callback registered for this
        // connection's NAPI id is preferred over round-robin.
        let napi_entry = sock::incoming_napi_id(conn.as_fd())
            .and_then(|id| inner.state.lock().table.napi_lookup(id));

        let mut starting = None;
        let mut entry = match napi_entry {
            Some(entry) => entry,
            None => {
                let mut state = inner.state.lock();
                if state.table.is_empty() {
                    drop(state);
                    Inner::drop_connection(
                        inner,
                        observer.as_deref(),
                        conn,
                        &peer,
                        "no accept callbacks registered",
                    );
                    return;
                }
                starting = Some(state.table.cursor());
                state.table.next()
            }
        };

        let mut conn = conn;
        let mut peer = peer;
        loop {
            let inline = match &entry.target {
                None => true,
                Some(target) => same_loop(target, event_loop),
            };
            if inline {
                entry
                    .callback
                    .connection_accepted(conn, peer, AcceptInfo { enqueue_time });
                return;
            }

            let deadline =
                (queue_timeout > Duration::ZERO).then(|| enqueue_time + queue_timeout);
            let raw = conn.as_raw_fd();
            let peer_for_events = peer.clone();
            let msg = AcceptMessage::Connection {
                fd: conn,
                peer,
                enqueue_time,
                deadline,
            };
            let attempt = match &entry.acceptor {
                Some(acceptor) => acceptor.try_enqueue(msg, max_depth),
                None => Err(msg),
            };
            match attempt {
                Ok(()) => {
                    if let Some(observer) = &observer {
                        observer.on_connection_enqueued_for_acceptor(raw, &peer_for_events);
                    }
                    return;
                }
                Err(AcceptMessage::Connection { fd, peer: p, .. }) => {
                    conn = fd;
                    peer = p;
                }
                Err(AcceptMessage::Error { .. }) => return,
            }

            // Aggressively close the admission filter while consumers
            // are saturated.
            inner.state.lock().rate.on_queue_full();

            let mut state = inner.state.lock();
            if state.table.is_empty() {
                drop(state);
                Inner::drop_connection(
                    inner,
                    observer.as_deref(),
                    conn,
                    &peer,
                    "no accept callbacks registered",
                );
                return;
            }
            match starting {
                None => {
                    // The NAPI-preferred queue was full; fall back to
                    // round-robin from the current cursor.
                    starting = Some(state.table.cursor());
                    entry = state.table.next();
                }
                Some(start) => {
                    if state.table.cursor() == start {
                        drop(state);
                        Inner::log_overflow(
                            inner,
                            event_loop,
                            "failed to dispatch newly accepted socket: all accept callback queues are full",
                        );
                        Inner::drop_connection(
                            inner,
                            observer.as_deref(),
                            conn,
                            &peer,
                            "failed to dispatch newly accepted socket: all accept callback queues are full",
                        );
                        return;
                    }
                    entry = state.table.next();
                }
            }
        }
    }

    /// Round-robins an accept error to one callback.
    fn dispatch_error(
        inner: &Arc<Inner>,
        event_loop: &Arc<dyn EventLoop>,
        text: &'static str,
        errno: i32,
    ) {
        let max_depth = inner.state.lock().config.max_queue_depth;
        let (starting, mut entry) = {
            let mut state = inner.state.lock();
            if state.table.is_empty() {
                return;
            }
            let starting = state.table.cursor();
            (starting, state.table.next())
        };

        loop {
            let inline = match &entry.target {
                None => true,
                Some(target) => same_loop(target, event_loop),
            };
            if inline {
                entry
                    .callback
                    .accept_error(Error::from_errno(ErrorKind::Accept, text, errno));
                return;
            }
            let enqueued = entry.acceptor.as_ref().is_some_and(|acceptor| {
                acceptor
                    .try_enqueue(AcceptMessage::Error { errno, text }, max_depth)
                    .is_ok()
            });
            if enqueued {
                return;
            }
            let mut state = inner.state.lock();
            if state.table.cursor() == starting {
                drop(state);
                Inner::log_overflow(
                    inner,
                    event_loop,
                    "failed to dispatch accept error: all accept callback queues are full",
                );
                return;
            }
            entry = state.table.next();
        }
    }

    fn drop_connection(
        inner: &Arc<Inner>,
        observer: Option<&dyn ConnectionEventCallback>,
        conn: OwnedFd,
        peer: &Address,
        reason: &str,
    ) {
        inner.dropped.fetch_add(1, Ordering::Relaxed);
        let raw = conn.as_raw_fd();
        drop(conn);
        if let Some(observer) = observer {
            observer.on_connection_dropped(raw, peer, reason);
        }
    }

    /// Logs `message` at most once per second of loop time.
    fn log_overflow(inner: &Arc<Inner>, event_loop: &Arc<dyn EventLoop>, message: &str) {
        let now = event_loop.now();
        let should_log = {
            let mut state = inner.state.lock();
            match state.last_overflow_log {
                Some(last) if now.duration_since(last) < OVERFLOW_LOG_INTERVAL_NS => false,
                _ => {
                    state.last_overflow_log = Some(now);
                    true
                }
            }
        };
        if should_log {
            error!("{message}");
        }
        #[cfg(not(feature = "tracing-integration"))]
        let _ = message;
    }

    /// Arms the backoff timer and drops READ registrations, leaving
    /// desired-accepting set.
    fn enter_backoff(inner: &Arc<Inner>, event_loop: &Arc<dyn EventLoop>) {
        if inner.state.lock().backoff.is_some() {
            return;
        }
        let observer = inner.observer.lock().clone();
        let weak = Arc::downgrade(inner);
        let task: Task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Inner::backoff_expired(&inner);
            }
        });
        let timer = match event_loop.schedule_timer(BACKOFF_TIMEOUT, task) {
            Ok(timer) => timer,
            Err(e) => {
                // Without the timer we could never re-enable accepts, so
                // keep accepting and let the user intervene.
                error!(
                    error = %e,
                    "failed to schedule accept backoff timer, unable to temporarily pause accepting"
                );
                if let Some(observer) = &observer {
                    observer.on_backoff_error();
                }
                return;
            }
        };
        {
            let mut state = inner.state.lock();
            state.backoff = Some(timer);
            for handle in &mut state.handles {
                handle.unregister(event_loop);
            }
        }
        if let Some(observer) = &observer {
            observer.on_backoff_started();
        }
    }

    /// Restores READ registrations after the backoff interval.
    fn backoff_expired(inner: &Arc<Inner>) {
        let Some(event_loop) = inner.primary.lock().clone() else {
            return;
        };
        let observer = inner.observer.lock().clone();
        {
            let mut state = inner.state.lock();
            state.backoff = None;
            // pause/stop cancel the timer, so desired-accepting holds.
            debug_assert!(state.accepting, "backoff timer fired while not accepting");
            if state.table.is_empty() {
                drop(state);
                if let Some(observer) = &observer {
                    observer.on_backoff_ended();
                }
                return;
            }
        }
        if let Err(e) = Inner::register_handles(inner, &event_loop) {
            // Retrying forever would spin; restarting the process is the
            // only sound remedy at this point.
            error!(error = %e, "failed to re-enable accepts after backoff, aborting");
            std::process::abort();
        }
        if let Some(observer) = &observer {
            observer.on_backoff_ended();
        }
    }
}
