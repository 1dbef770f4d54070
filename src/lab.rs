//! Deterministic lab event loop for testing.
//!
//! [`LabLoop`] implements [`EventLoop`] without touching the OS. Time is
//! virtual, tasks run only when the test calls [`LabLoop::turn`], timers
//! fire only when the test calls [`LabLoop::advance`], and readiness is
//! delivered only when the test calls [`LabLoop::fire_readable`]. Same
//! inputs, same interleaving, same results.
//!
//! Several loops may share one [`LabClock`], modeling a primary loop and
//! consumer loops that observe a single monotonic clock:
//!
//! ```ignore
//! let clock = Arc::new(LabClock::new());
//! let primary = Arc::new(LabLoop::with_clock(clock.clone()));
//! let consumer = Arc::new(LabLoop::with_clock(clock));
//! ```
//!
//! Fault injection hooks ([`inject_timer_failure`](LabLoop::inject_timer_failure),
//! [`inject_task_rejection`](LabLoop::inject_task_rejection)) make the
//! listener's degraded paths reachable from tests.

use crate::error::{Error, ErrorKind, Result};
use crate::event_loop::{EventLoop, ReadToken, ReadyCallback, Task, TimerId};
use crate::time::Time;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// A shared virtual clock.
#[derive(Debug, Default)]
pub struct LabClock {
    now: Mutex<Time>,
}

impl LabClock {
    /// Creates a clock at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current virtual time.
    #[must_use]
    pub fn now(&self) -> Time {
        *self.now.lock()
    }

    /// Advances the clock and returns the new time.
    pub fn advance(&self, by: Duration) -> Time {
        let mut now = self.now.lock();
        *now = *now + by;
        *now
    }
}

struct LabInner {
    tasks: VecDeque<Task>,
    /// Timers keyed by `(deadline nanos, sequence)` for deterministic
    /// same-deadline ordering.
    timers: BTreeMap<(u64, u64), Task>,
    timer_deadlines: HashMap<u64, u64>,
    next_timer: u64,
    reads: Vec<(u64, RawFd, ReadyCallback)>,
    next_token: u64,
    fail_next_timer: bool,
    reject_next_task: bool,
}

/// A deterministic event loop driven manually by test code.
pub struct LabLoop {
    clock: Arc<LabClock>,
    thread: ThreadId,
    napi: Mutex<Option<u32>>,
    inner: Mutex<LabInner>,
}

impl LabLoop {
    /// Creates a loop with its own private clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(LabClock::new()))
    }

    /// Creates a loop sharing `clock` with other loops.
    #[must_use]
    pub fn with_clock(clock: Arc<LabClock>) -> Self {
        Self {
            clock,
            thread: thread::current().id(),
            napi: Mutex::new(None),
            inner: Mutex::new(LabInner {
                tasks: VecDeque::new(),
                timers: BTreeMap::new(),
                timer_deadlines: HashMap::new(),
                next_timer: 0,
                reads: Vec::new(),
                next_token: 0,
                fail_next_timer: false,
                reject_next_task: false,
            }),
        }
    }

    /// Returns the clock this loop reads.
    #[must_use]
    pub fn clock(&self) -> Arc<LabClock> {
        Arc::clone(&self.clock)
    }

    /// Sets the NAPI id this loop reports.
    pub fn set_napi_id(&self, id: Option<u32>) {
        *self.napi.lock() = id;
    }

    /// Runs every task that was queued before this call. Tasks queued by
    /// the tasks themselves wait for the next turn. Returns the number of
    /// tasks run.
    pub fn turn(&self) -> usize {
        let queued = self.inner.lock().tasks.len();
        let mut ran = 0;
        for _ in 0..queued {
            let Some(task) = self.inner.lock().tasks.pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Runs turns until the task queue is empty. Returns tasks run.
    pub fn turn_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Advances the shared clock and fires every timer now due on this
    /// loop. Returns the number of timers fired.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due_timers()
    }

    /// Fires timers whose deadline is at or before the current time.
    pub fn run_due_timers(&self) -> usize {
        let now = self.clock.now().as_nanos();
        let mut fired = 0;
        loop {
            let task = {
                let mut inner = self.inner.lock();
                let due = inner.timers.keys().next().copied();
                match due {
                    Some(key) if key.0 <= now => {
                        inner.timer_deadlines.remove(&key.1);
                        inner.timers.remove(&key)
                    }
                    _ => None,
                }
            };
            let Some(task) = task else { return fired };
            task();
            fired += 1;
        }
    }

    /// Invokes the readiness callback registered for `fd`, if any.
    pub fn fire_readable(&self, fd: RawFd) -> bool {
        let ready = self
            .inner
            .lock()
            .reads
            .iter()
            .find(|(_, f, _)| *f == fd)
            .map(|(_, _, cb)| Arc::clone(cb));
        match ready {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    /// Invokes every readiness callback registered at the time of the
    /// call, in registration order. Returns the number invoked.
    pub fn fire_all_readable(&self) -> usize {
        let callbacks: Vec<ReadyCallback> = self
            .inner
            .lock()
            .reads
            .iter()
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb();
        }
        callbacks.len()
    }

    /// Number of live READ registrations.
    #[must_use]
    pub fn registered_read_count(&self) -> usize {
        self.inner.lock().reads.len()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending_timer_count(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Makes the next `schedule_timer` call fail.
    pub fn inject_timer_failure(&self) {
        self.inner.lock().fail_next_timer = true;
    }

    /// Makes the next `run_in_loop` call report rejection.
    pub fn inject_task_rejection(&self) {
        self.inner.lock().reject_next_task = true;
    }
}

impl Default for LabLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LabLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LabLoop")
            .field("now", &self.clock.now())
            .field("tasks", &inner.tasks.len())
            .field("timers", &inner.timers.len())
            .field("reads", &inner.reads.len())
            .finish()
    }
}

impl EventLoop for LabLoop {
    fn is_in_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn run_in_loop(&self, task: Task) -> bool {
        let mut inner = self.inner.lock();
        if inner.reject_next_task {
            inner.reject_next_task = false;
            return false;
        }
        inner.tasks.push_back(task);
        true
    }

    fn schedule_timer(&self, delay: Duration, task: Task) -> Result<TimerId> {
        let mut inner = self.inner.lock();
        if inner.fail_next_timer {
            inner.fail_next_timer = false;
            return Err(Error::with_context(
                ErrorKind::EventLoop,
                "injected timer failure",
            ));
        }
        let seq = inner.next_timer;
        inner.next_timer += 1;
        let deadline = (self.clock.now() + delay).as_nanos();
        inner.timers.insert((deadline, seq), task);
        inner.timer_deadlines.insert(seq, deadline);
        Ok(TimerId(seq))
    }

    fn cancel_timer(&self, timer: TimerId) {
        let mut inner = self.inner.lock();
        if let Some(deadline) = inner.timer_deadlines.remove(&timer.0) {
            inner.timers.remove(&(deadline, timer.0));
        }
    }

    fn register_read(&self, fd: RawFd, ready: ReadyCallback) -> Result<ReadToken> {
        let mut inner = self.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.reads.push((token, fd, ready));
        Ok(ReadToken(token))
    }

    fn deregister_read(&self, token: ReadToken) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.reads.len();
        inner.reads.retain(|(t, _, _)| *t != token.0);
        if inner.reads.len() == before {
            return Err(Error::with_context(
                ErrorKind::EventLoop,
                "unknown read token",
            ));
        }
        Ok(())
    }

    fn now(&self) -> Time {
        self.clock.now()
    }

    fn napi_id(&self) -> Option<u32> {
        *self.napi.lock()
    }
}
