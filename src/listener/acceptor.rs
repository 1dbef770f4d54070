//! Per-callback consumer bound to a target event loop.

use crate::error::{Error, ErrorKind, Result};
use crate::event_loop::EventLoop;
use crate::listener::callback::{AcceptCallback, AcceptInfo, ConnectionEventCallback};
use crate::queue::{MessageHandler, NotifyQueue};
use crate::sock::Address;
use crate::time::Time;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

/// A message crossing from the primary loop to a consumer loop.
///
/// Consumed exactly once on the target loop. A `Connection` message owns
/// its descriptor; dropping an unconsumed message closes the connection.
pub(crate) enum AcceptMessage {
    /// An accepted connection awaiting delivery.
    Connection {
        fd: OwnedFd,
        peer: Address,
        enqueue_time: Time,
        deadline: Option<Time>,
    },
    /// An accept-path error to surface on the consumer loop.
    Error { errno: i32, text: &'static str },
}

/// Forwards enqueued accept events to a callback on its target loop.
///
/// Lifecycle: [`start`](Self::start) schedules `accept_started` plus
/// consumption on the target loop; [`stop`](Self::stop) schedules
/// `accept_stopped` there. The stop task holds the final strong
/// reference, so the acceptor is released on its own loop once that task
/// has run; no other task may outlive it.
pub(crate) struct RemoteAcceptor {
    queue: NotifyQueue<AcceptMessage>,
    callback: Arc<dyn AcceptCallback>,
    observer: Option<Arc<dyn ConnectionEventCallback>>,
    target: Arc<dyn EventLoop>,
}

impl RemoteAcceptor {
    pub(crate) fn new(
        callback: Arc<dyn AcceptCallback>,
        observer: Option<Arc<dyn ConnectionEventCallback>>,
        target: Arc<dyn EventLoop>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue: NotifyQueue::new(),
            callback,
            observer,
            target,
        })
    }

    /// Begins consumption on the target loop.
    pub(crate) fn start(self: &Arc<Self>, max_read_per_wake: u32) -> Result<()> {
        let this = Arc::clone(self);
        let scheduled = self.target.run_in_loop(Box::new(move || {
            this.callback.accept_started();
            // The queue's handler must not keep the acceptor alive: the
            // stop task owns the final reference.
            let weak = Arc::downgrade(&this);
            let handler: MessageHandler<AcceptMessage> = Arc::new(move |msg| {
                if let Some(acceptor) = weak.upgrade() {
                    acceptor.execute(msg);
                }
            });
            this.queue
                .start_consuming(Arc::clone(&this.target), handler, max_read_per_wake);
        }));
        if scheduled {
            Ok(())
        } else {
            Err(Error::with_context(
                ErrorKind::EventLoop,
                "target loop rejected accept consumer start",
            ))
        }
    }

    /// Schedules `accept_stopped` and self-release on the target loop.
    ///
    /// If the target loop no longer accepts work the stop completes
    /// inline on the caller's thread instead.
    pub(crate) fn stop(self: Arc<Self>) {
        let target = Arc::clone(&self.target);
        let queue = self.queue.clone();
        let callback = Arc::clone(&self.callback);
        let scheduled = target.run_in_loop(Box::new(move || {
            self.queue.stop_consuming();
            self.callback.accept_stopped();
        }));
        if !scheduled {
            queue.stop_consuming();
            callback.accept_stopped();
        }
    }

    /// Attempts to enqueue a message; hands it back when the queue is at
    /// `cap` or stopped.
    pub(crate) fn try_enqueue(
        &self,
        msg: AcceptMessage,
        cap: usize,
    ) -> std::result::Result<(), AcceptMessage> {
        self.queue.try_enqueue(msg, cap)
    }

    /// Executes one message on the target loop.
    fn execute(&self, msg: AcceptMessage) {
        match msg {
            AcceptMessage::Connection {
                fd,
                peer,
                enqueue_time,
                deadline,
            } => {
                let now = self.target.now();
                if let Some(deadline) = deadline {
                    if now > deadline {
                        let raw = fd.as_raw_fd();
                        drop(fd);
                        if let Some(observer) = &self.observer {
                            let queued_ms = now.duration_since(enqueue_time) / 1_000_000;
                            observer.on_connection_dropped(
                                raw,
                                &peer,
                                &format!(
                                    "exceeded deadline for accepting connection socket ({queued_ms} ms in queue)"
                                ),
                            );
                        }
                        return;
                    }
                }
                if let Some(observer) = &self.observer {
                    observer.on_connection_dequeued_by_acceptor(fd.as_raw_fd(), &peer);
                }
                self.callback
                    .connection_accepted(fd, peer, AcceptInfo { enqueue_time });
            }
            AcceptMessage::Error { errno, text } => {
                self.callback
                    .accept_error(Error::from_errno(ErrorKind::Accept, text, errno));
            }
        }
    }
}
