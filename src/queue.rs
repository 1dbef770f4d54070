//! Bounded cross-thread notification queue.
//!
//! [`NotifyQueue`] carries messages from the primary loop to a consumer
//! loop. The storage is a lock-free queue; a length gate enforces the
//! per-enqueue capacity. Delivery is loop-driven: whenever messages are
//! pending and a consumer is attached, a drain task is scheduled on the
//! consumer's loop. Each drain wake processes at most `max_read_per_wake`
//! messages, then yields and reschedules itself, so one saturated queue
//! cannot starve the consumer loop's other work.
//!
//! # Ordering and threading
//!
//! Messages are delivered in enqueue order. The queue is operated
//! single-producer (the primary loop) / single-consumer (the target
//! loop); the length gate is exact under that discipline.
//!
//! # Overflow
//!
//! [`try_enqueue`](NotifyQueue::try_enqueue) never blocks. On overflow it
//! hands the message back to the caller, which owns the fallback policy
//! (the listener advances to the next callback's queue).

use crate::event_loop::EventLoop;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Handler invoked on the consumer loop for each dequeued message.
pub type MessageHandler<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

struct Consumer<T> {
    target: Arc<dyn EventLoop>,
    handler: MessageHandler<T>,
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            handler: Arc::clone(&self.handler),
        }
    }
}

struct QueueShared<T> {
    queue: SegQueue<T>,
    len: AtomicUsize,
    scheduled: AtomicBool,
    stopped: AtomicBool,
    max_read_per_wake: AtomicU32,
    consumer: Mutex<Option<Consumer<T>>>,
}

/// A bounded FIFO queue whose consumer runs on an event loop.
pub struct NotifyQueue<T> {
    shared: Arc<QueueShared<T>>,
}

impl<T: Send + 'static> NotifyQueue<T> {
    /// Creates an empty queue with no consumer attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                queue: SegQueue::new(),
                len: AtomicUsize::new(0),
                scheduled: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                max_read_per_wake: AtomicU32::new(1),
                consumer: Mutex::new(None),
            }),
        }
    }

    /// Attempts to enqueue `msg` subject to `cap`.
    ///
    /// On success a drain wake is scheduled if a consumer is attached. On
    /// overflow (or after [`stop_consuming`](Self::stop_consuming)) the
    /// message is handed back unchanged.
    pub fn try_enqueue(&self, msg: T, cap: usize) -> std::result::Result<(), T> {
        let shared = &self.shared;
        if shared.stopped.load(Ordering::Acquire) || shared.len.load(Ordering::Acquire) >= cap {
            return Err(msg);
        }
        shared.queue.push(msg);
        shared.len.fetch_add(1, Ordering::Release);
        Self::maybe_schedule(shared);
        Ok(())
    }

    /// Attaches a consumer and begins draining on `target`.
    ///
    /// Messages enqueued before the consumer was attached are delivered
    /// first, in order. Each drain wake handles at most
    /// `max_read_per_wake` messages.
    pub fn start_consuming(
        &self,
        target: Arc<dyn EventLoop>,
        handler: MessageHandler<T>,
        max_read_per_wake: u32,
    ) {
        self.shared
            .max_read_per_wake
            .store(max_read_per_wake.max(1), Ordering::Relaxed);
        *self.shared.consumer.lock() = Some(Consumer { target, handler });
        Self::maybe_schedule(&self.shared);
    }

    /// Detaches the consumer and discards pending messages.
    ///
    /// Discarded messages are dropped, which releases any resources they
    /// own (accepted descriptors close).
    pub fn stop_consuming(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        *self.shared.consumer.lock() = None;
        while self.shared.queue.pop().is_some() {
            self.shared.len.fetch_sub(1, Ordering::Release);
        }
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Acquire)
    }

    /// Returns true when no messages are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_schedule(shared: &Arc<QueueShared<T>>) {
        if shared.len.load(Ordering::Acquire) == 0 || shared.stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(consumer) = shared.consumer.lock().clone() else {
            return;
        };
        if shared.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let drain_shared = Arc::clone(shared);
        let accepted = consumer
            .target
            .run_in_loop(Box::new(move || Self::drain(&drain_shared)));
        if !accepted {
            shared.scheduled.store(false, Ordering::Release);
        }
    }

    /// One drain wake on the consumer loop.
    fn drain(shared: &Arc<QueueShared<T>>) {
        if shared.stopped.load(Ordering::Acquire) {
            shared.scheduled.store(false, Ordering::Release);
            return;
        }
        let handler = shared
            .consumer
            .lock()
            .as_ref()
            .map(|c| Arc::clone(&c.handler));
        let Some(handler) = handler else {
            shared.scheduled.store(false, Ordering::Release);
            return;
        };

        let max = shared.max_read_per_wake.load(Ordering::Relaxed);
        for _ in 0..max {
            let Some(msg) = shared.queue.pop() else { break };
            shared.len.fetch_sub(1, Ordering::Release);
            handler(msg);
            if shared.stopped.load(Ordering::Acquire) {
                break;
            }
        }

        shared.scheduled.store(false, Ordering::Release);
        // Re-check after clearing the flag: a message may have landed (or
        // remained past the batch limit) with no wake scheduled.
        Self::maybe_schedule(shared);
    }
}

impl<T: Send + 'static> Default for NotifyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for NotifyQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

// The message type is not required to be Debug.
impl<T> fmt::Debug for NotifyQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyQueue")
            .field("len", &self.shared.len.load(Ordering::Relaxed))
            .field("stopped", &self.shared.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::LabLoop;

    fn collector() -> (MessageHandler<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler<u32> = Arc::new(move |v| sink.lock().push(v));
        (handler, seen)
    }

    #[test]
    fn delivers_in_fifo_order() {
        let lab = Arc::new(LabLoop::new());
        let queue = NotifyQueue::new();
        let (handler, seen) = collector();
        queue.start_consuming(lab.clone(), handler, 16);

        for v in [1u32, 2, 3] {
            queue.try_enqueue(v, 8).expect("enqueue");
        }
        lab.turn_until_idle();
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn capacity_is_enforced_and_message_returned() {
        let queue: NotifyQueue<u32> = NotifyQueue::new();
        assert!(queue.try_enqueue(1, 1).is_ok());
        let rejected = queue.try_enqueue(2, 1);
        assert_eq!(rejected.err(), Some(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_respects_max_read_per_wake() {
        let lab = Arc::new(LabLoop::new());
        let queue = NotifyQueue::new();
        let (handler, seen) = collector();
        queue.start_consuming(lab.clone(), handler, 2);

        for v in 0..5u32 {
            queue.try_enqueue(v, 16).expect("enqueue");
        }
        lab.turn();
        assert_eq!(seen.lock().len(), 2);
        lab.turn();
        assert_eq!(seen.lock().len(), 4);
        lab.turn();
        assert_eq!(seen.lock().len(), 5);
    }

    #[test]
    fn messages_before_consumer_attach_are_kept() {
        let lab = Arc::new(LabLoop::new());
        let queue = NotifyQueue::new();
        queue.try_enqueue(7u32, 4).expect("enqueue");

        let (handler, seen) = collector();
        queue.start_consuming(lab.clone(), handler, 16);
        lab.turn_until_idle();
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn stop_discards_pending_and_rejects_new() {
        let lab = Arc::new(LabLoop::new());
        let queue = NotifyQueue::new();
        let (handler, seen) = collector();
        queue.try_enqueue(1u32, 4).expect("enqueue");
        queue.start_consuming(lab.clone(), handler, 16);
        queue.stop_consuming();

        lab.turn_until_idle();
        assert!(seen.lock().is_empty());
        assert!(queue.try_enqueue(2, 4).is_err());
    }
}
