//! Listener configuration.

use std::time::Duration;

/// Default bound on accepts per readiness wake.
pub const DEFAULT_MAX_ACCEPT_PER_WAKE: u32 = 30;
/// Default `max_read_per_wake` handed to each remote acceptor's queue.
pub const DEFAULT_MAX_CALLBACK_ACCEPT_PER_WAKE: u32 = 50;
/// Default cap on each remote acceptor's queue depth.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1024;
/// Default seed for the admission filter's instance-local RNG.
pub const DEFAULT_ADMISSION_SEED: u64 = 0x5EED_50CC_E75A_11E5;

/// Configuration for a [`Listener`](crate::listener::Listener).
///
/// Dispatch tuning plus the socket options applied to every listening
/// socket the listener creates or adopts. Builder-style setters consume
/// and return the config.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Upper bound on accepts drained per READ wake, for fairness with
    /// sibling handlers on the primary loop.
    pub max_accept_per_wake: u32,
    /// `max_read_per_wake` for each remote acceptor's notify queue.
    pub max_callback_accept_per_wake: u32,
    /// Depth cap for each remote acceptor's notify queue.
    pub max_queue_depth: usize,
    /// Per-message delivery deadline; `Duration::ZERO` disables.
    pub queue_timeout: Duration,
    /// Recovery speed of the adaptive admission filter, per second of
    /// quiescence. Zero disables adaptive rate limiting.
    pub accept_rate_adjust_speed: f64,
    /// Seed for the admission filter's deterministic RNG.
    pub admission_seed: u64,
    /// Apply `SO_REUSEADDR` (skipped on `AF_UNIX`).
    pub reuse_addr: bool,
    /// Apply `SO_REUSEPORT`; failure to apply is fatal.
    pub reuse_port: bool,
    /// Apply `SO_KEEPALIVE`.
    pub keepalive: bool,
    /// Apply `TCP_NODELAY` on IP sockets.
    pub nodelay: bool,
    /// Apply close-on-exec to listening sockets.
    pub close_on_exec: bool,
    /// Enable TCP fast open.
    pub tfo: bool,
    /// Fast-open queue length, when `tfo` is set.
    pub tfo_max_queue_size: u32,
    /// Request `SO_ZEROCOPY` on listening sockets.
    pub zero_copy: bool,
    /// Allow binding to non-local addresses (`IP_FREEBIND`).
    pub ip_freebind: bool,
    /// Reflect the client SYN's DSCP onto accepted sockets.
    pub tos_reflect: bool,
    /// Non-zero: TOS/traffic-class applied to listening sockets.
    pub listener_tos: u32,
    /// Mark listening sockets exempt from transparent TLS offload.
    pub no_transparent_tls: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_accept_per_wake: DEFAULT_MAX_ACCEPT_PER_WAKE,
            max_callback_accept_per_wake: DEFAULT_MAX_CALLBACK_ACCEPT_PER_WAKE,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            queue_timeout: Duration::ZERO,
            accept_rate_adjust_speed: 0.0,
            admission_seed: DEFAULT_ADMISSION_SEED,
            reuse_addr: true,
            reuse_port: false,
            keepalive: true,
            nodelay: true,
            close_on_exec: true,
            tfo: false,
            tfo_max_queue_size: 0,
            zero_copy: false,
            ip_freebind: false,
            tos_reflect: false,
            listener_tos: 0,
            no_transparent_tls: true,
        }
    }
}

impl ListenerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-wake accept bound.
    #[must_use]
    pub fn max_accept_per_wake(mut self, max: u32) -> Self {
        self.max_accept_per_wake = max;
        self
    }

    /// Sets the per-wake read bound for remote acceptor queues.
    #[must_use]
    pub fn max_callback_accept_per_wake(mut self, max: u32) -> Self {
        self.max_callback_accept_per_wake = max;
        self
    }

    /// Sets the remote acceptor queue depth cap.
    #[must_use]
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Sets the per-message delivery deadline. `Duration::ZERO` disables.
    #[must_use]
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Sets the admission filter recovery speed (per second); zero
    /// disables adaptive rate limiting.
    #[must_use]
    pub fn accept_rate_adjust_speed(mut self, speed: f64) -> Self {
        self.accept_rate_adjust_speed = speed;
        self
    }

    /// Sets the admission filter RNG seed.
    #[must_use]
    pub fn admission_seed(mut self, seed: u64) -> Self {
        self.admission_seed = seed;
        self
    }

    /// Sets `SO_REUSEADDR`.
    #[must_use]
    pub fn reuse_addr(mut self, on: bool) -> Self {
        self.reuse_addr = on;
        self
    }

    /// Sets `SO_REUSEPORT`.
    #[must_use]
    pub fn reuse_port(mut self, on: bool) -> Self {
        self.reuse_port = on;
        self
    }

    /// Sets `SO_KEEPALIVE`.
    #[must_use]
    pub fn keepalive(mut self, on: bool) -> Self {
        self.keepalive = on;
        self
    }

    /// Sets `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, on: bool) -> Self {
        self.nodelay = on;
        self
    }

    /// Sets close-on-exec.
    #[must_use]
    pub fn close_on_exec(mut self, on: bool) -> Self {
        self.close_on_exec = on;
        self
    }

    /// Enables TCP fast open with the given queue length.
    #[must_use]
    pub fn tfo(mut self, on: bool, max_queue_size: u32) -> Self {
        self.tfo = on;
        self.tfo_max_queue_size = max_queue_size;
        self
    }

    /// Requests `SO_ZEROCOPY`.
    #[must_use]
    pub fn zero_copy(mut self, on: bool) -> Self {
        self.zero_copy = on;
        self
    }

    /// Sets `IP_FREEBIND`.
    #[must_use]
    pub fn ip_freebind(mut self, on: bool) -> Self {
        self.ip_freebind = on;
        self
    }

    /// Enables TOS reflection from the client SYN.
    #[must_use]
    pub fn tos_reflect(mut self, on: bool) -> Self {
        self.tos_reflect = on;
        self
    }

    /// Sets the listener TOS/traffic class (0 disables).
    #[must_use]
    pub fn listener_tos(mut self, tos: u32) -> Self {
        self.listener_tos = tos;
        self
    }

    /// Sets the transparent-TLS exemption marker.
    #[must_use]
    pub fn no_transparent_tls(mut self, on: bool) -> Self {
        self.no_transparent_tls = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ListenerConfig::default();
        assert_eq!(config.max_accept_per_wake, 30);
        assert_eq!(config.max_callback_accept_per_wake, 50);
        assert_eq!(config.max_queue_depth, 1024);
        assert_eq!(config.queue_timeout, Duration::ZERO);
        assert_eq!(config.accept_rate_adjust_speed, 0.0);
        assert!(config.reuse_addr);
        assert!(!config.reuse_port);
        assert!(config.keepalive);
        assert!(config.close_on_exec);
        assert!(config.no_transparent_tls);
    }

    #[test]
    fn builder_setters_apply() {
        let config = ListenerConfig::new()
            .max_accept_per_wake(4)
            .queue_timeout(Duration::from_millis(50))
            .reuse_port(true)
            .tfo(true, 128);
        assert_eq!(config.max_accept_per_wake, 4);
        assert_eq!(config.queue_timeout, Duration::from_millis(50));
        assert!(config.reuse_port);
        assert!(config.tfo);
        assert_eq!(config.tfo_max_queue_size, 128);
    }
}
