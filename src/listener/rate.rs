//! Adaptive admission filter.
//!
//! A scalar rate in `(0, 1]` is the probability that an incoming
//! connection is admitted. The rate recovers multiplicatively with time
//! since the last accept (bursts after a lull are fully admitted) and is
//! cut multiplicatively when consumer queues overflow, which biases the
//! filter toward staying closed while consumers are saturated. The two
//! adjustments are orthogonal.

use crate::time::Time;
use crate::util::DetRng;

/// Multiplicative cut applied to the rate on queue overflow.
const RATE_DECREASE_SPEED: f64 = 0.1;

/// The admission filter state.
#[derive(Debug)]
pub(crate) struct AcceptRate {
    rate: f64,
    adjust_speed: f64,
    last_accept: Time,
    rng: DetRng,
}

impl AcceptRate {
    pub(crate) fn new(adjust_speed: f64, seed: u64, now: Time) -> Self {
        Self {
            rate: 1.0,
            adjust_speed,
            last_accept: now,
            rng: DetRng::new(seed),
        }
    }

    pub(crate) fn set_adjust_speed(&mut self, speed: f64) {
        self.adjust_speed = speed;
    }

    /// Current admission probability.
    pub(crate) fn current(&self) -> f64 {
        self.rate
    }

    /// One accept-time step: recover the rate by the quiescent interval,
    /// then draw. Returns false when the connection should be dropped.
    pub(crate) fn admit(&mut self, now: Time) -> bool {
        let quiescent_secs = now.seconds_since(self.last_accept);
        self.last_accept = now;
        if self.rate < 1.0 {
            self.rate = (self.rate * (1.0 + self.adjust_speed * quiescent_secs)).min(1.0);
            if self.rate < 1.0 && self.rng.next_f64() > self.rate {
                return false;
            }
        }
        true
    }

    /// Queue-overflow step: cut the rate, but only when adaptive limiting
    /// is enabled.
    pub(crate) fn on_queue_full(&mut self) {
        if self.adjust_speed > 0.0 {
            self.rate *= 1.0 - RATE_DECREASE_SPEED;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rate_admits_everything() {
        let mut rate = AcceptRate::new(1.0, 42, Time::ZERO);
        for n in 1..=1_000u64 {
            assert!(rate.admit(Time::from_millis(n)));
        }
        assert_eq!(rate.current(), 1.0);
    }

    #[test]
    fn queue_full_cuts_rate_only_when_adaptive() {
        let mut adaptive = AcceptRate::new(2.0, 42, Time::ZERO);
        adaptive.on_queue_full();
        assert!((adaptive.current() - 0.9).abs() < 1e-12);

        let mut fixed = AcceptRate::new(0.0, 42, Time::ZERO);
        fixed.on_queue_full();
        assert_eq!(fixed.current(), 1.0);
    }

    #[test]
    fn recovery_is_monotone_in_quiescent_time() {
        // Two identical filters at a degraded rate; the one that waited
        // longer must end up at least as open.
        let mut short = AcceptRate::new(1.0, 7, Time::ZERO);
        let mut long = AcceptRate::new(1.0, 7, Time::ZERO);
        for _ in 0..5 {
            short.on_queue_full();
            long.on_queue_full();
        }
        let _ = short.admit(Time::from_millis(100));
        let _ = long.admit(Time::from_millis(400));
        assert!(long.current() >= short.current());
    }

    #[test]
    fn rate_clamps_at_one() {
        let mut rate = AcceptRate::new(1000.0, 7, Time::ZERO);
        rate.on_queue_full();
        assert!(rate.current() < 1.0);
        assert!(rate.admit(Time::from_secs(10)));
        assert_eq!(rate.current(), 1.0);
    }

    #[test]
    fn degraded_rate_drops_some_connections_deterministically() {
        let run = |seed: u64| {
            let mut rate = AcceptRate::new(1.0, seed, Time::ZERO);
            // Push the rate down hard.
            for _ in 0..40 {
                rate.on_queue_full();
            }
            let mut admitted = 0u32;
            // Tight arrivals: essentially no recovery between accepts.
            for n in 0..200u64 {
                if rate.admit(Time::from_nanos(n)) {
                    admitted += 1;
                }
            }
            admitted
        };
        let first = run(99);
        let second = run(99);
        assert_eq!(first, second);
        assert!(first < 200, "a deeply degraded rate must drop connections");
    }
}
