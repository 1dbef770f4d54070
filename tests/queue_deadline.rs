//! Queue deadlines and cross-loop error delivery.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use turnstile::test_utils::init_test_logging;
use turnstile::{LabClock, LabLoop, ListenerConfig};

#[test]
fn stalled_consumer_drops_expired_connection_with_queue_time() {
    init_test_logging();
    turnstile::test_phase!("stalled_consumer_drops_expired_connection_with_queue_time");

    let clock = Arc::new(LabClock::new());
    let primary = Arc::new(LabLoop::with_clock(clock.clone()));
    let consumer = Arc::new(LabLoop::with_clock(clock.clone()));

    let observer = RecordingObserver::new();
    let (listener, addr) = tcp_listener(
        &primary,
        ListenerConfig::default().queue_timeout(Duration::from_millis(50)),
    );
    listener.set_connection_event_callback(Some(observer.clone()));
    let callback = RecordingCallback::new();
    listener
        .add_callback(callback.clone(), Some(consumer.clone()))
        .expect("add");
    consumer.turn_until_idle();
    listener.start_accepting().expect("start");

    let _client = connect(addr);
    primary.fire_all_readable();
    assert!(observer.contains(&ObserverEvent::Enqueued));

    // The consumer loop stalls for 100 ms, past the 50 ms deadline.
    clock.advance(Duration::from_millis(100));
    consumer.turn_until_idle();

    assert_eq!(callback.accepted_count(), 0, "expired connections never deliver");
    assert!(!observer.contains(&ObserverEvent::Dequeued));
    let reasons = observer.dropped_reasons();
    assert_eq!(reasons.len(), 1);
    assert!(
        reasons[0].contains("100 ms"),
        "reason reports the measured queue time: {}",
        reasons[0]
    );
    // The drop counter belongs to the primary loop's admission and
    // overload paths; consumer-side expiry reports only to the observer.
    assert_eq!(listener.dropped_connections(), 0);

    turnstile::test_complete!("stalled_consumer_drops_expired_connection_with_queue_time");
}

#[test]
fn connection_within_deadline_delivers() {
    init_test_logging();

    let clock = Arc::new(LabClock::new());
    let primary = Arc::new(LabLoop::with_clock(clock.clone()));
    let consumer = Arc::new(LabLoop::with_clock(clock.clone()));

    let observer = RecordingObserver::new();
    let (listener, addr) = tcp_listener(
        &primary,
        ListenerConfig::default().queue_timeout(Duration::from_millis(500)),
    );
    listener.set_connection_event_callback(Some(observer.clone()));
    let callback = RecordingCallback::new();
    listener
        .add_callback(callback.clone(), Some(consumer.clone()))
        .expect("add");
    consumer.turn_until_idle();
    listener.start_accepting().expect("start");

    let _client = connect(addr);
    primary.fire_all_readable();
    clock.advance(Duration::from_millis(100));
    consumer.turn_until_idle();

    assert_eq!(callback.accepted_count(), 1);
    assert!(observer.contains(&ObserverEvent::Dequeued));
    assert_eq!(listener.dropped_connections(), 0);
}

#[test]
fn zero_timeout_disables_deadlines() {
    init_test_logging();

    let clock = Arc::new(LabClock::new());
    let primary = Arc::new(LabLoop::with_clock(clock.clone()));
    let consumer = Arc::new(LabLoop::with_clock(clock.clone()));

    let (listener, addr) = tcp_listener(&primary, ListenerConfig::default());
    let callback = RecordingCallback::new();
    listener
        .add_callback(callback.clone(), Some(consumer.clone()))
        .expect("add");
    consumer.turn_until_idle();
    listener.start_accepting().expect("start");

    let _client = connect(addr);
    primary.fire_all_readable();
    // An hour in the queue; without a timeout nothing expires.
    clock.advance(Duration::from_secs(3600));
    consumer.turn_until_idle();

    assert_eq!(callback.accepted_count(), 1);
}

#[test]
fn accept_errors_reach_remote_consumers() {
    init_test_logging();

    let primary = Arc::new(LabLoop::new());
    let consumer = Arc::new(LabLoop::new());
    let (listener, _) = tcp_listener(&primary, ListenerConfig::default());
    let callback = RecordingCallback::new();
    listener
        .add_callback(callback.clone(), Some(consumer.clone()))
        .expect("add");
    consumer.turn_until_idle();
    listener.start_accepting().expect("start");

    listener.inject_accept_error(libc::ECONNABORTED);
    primary.fire_all_readable();
    consumer.turn_until_idle();

    assert!(
        callback.events().contains(&CallbackEvent::Error {
            errno: Some(libc::ECONNABORTED)
        }),
        "the error message crosses to the consumer loop"
    );
}
