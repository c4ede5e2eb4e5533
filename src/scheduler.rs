//! The global run queue and timer wheel every fiber shares.
//!
//! Forking schedules a fiber's first step rather than running it inline, so
//! concurrently forked fibers interleave instead of one starving the rest.
//! [`delay`] and timeouts go through the same queue, keyed off a pluggable
//! [`Clock`] so tests can drive virtual time deterministically with
//! [`MockClock`] instead of sleeping real wall-clock time.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A source of monotonic time the scheduler measures delays against.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Blocks the calling thread until `deadline` (measured the same way as
    /// [`Clock::now`]) is reached. Only meaningful for a clock backed by
    /// real wall-clock time; a virtual clock has no way to make time pass
    /// on its own and should refuse instead of hanging forever.
    fn block_until(&self, deadline: Duration);
}

/// The default clock: wall-clock time measured from process start,
/// blocking via `std::thread::sleep`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn block_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// A clock whose time only advances when [`MockClock::advance`] is called,
/// for deterministic tests of `delay`/timeout behaviour.
#[derive(Clone)]
pub struct MockClock {
    now: Rc<Cell<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        MockClock { now: Rc::new(Cell::new(Duration::ZERO)) }
    }

    /// Advances virtual time and runs every scheduler callback that is now
    /// due, in deadline order.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
        while pump() {}
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn block_until(&self, _deadline: Duration) {
        panic!("MockClock never advances on its own; call MockClock::advance instead of driving a program that blocks on it");
    }
}

struct Timer {
    deadline: Duration,
    seq: u64,
    callback: Box<dyn FnOnce()>,
}

struct SchedulerState {
    clock: Rc<dyn Clock>,
    ready: VecDeque<Box<dyn FnOnce()>>,
    timers: Vec<Timer>,
    next_seq: u64,
}

impl SchedulerState {
    fn new() -> Self {
        SchedulerState {
            clock: Rc::new(SystemClock::new()),
            ready: VecDeque::new(),
            timers: Vec::new(),
            next_seq: 0,
        }
    }
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::new());
}

/// Queues `f` to run on a later tick, in FIFO order with other ready work.
/// Used by [`crate::fiber::fork`] so a forked fiber does not preempt its
/// forker.
pub(crate) fn schedule(f: impl FnOnce() + 'static) {
    STATE.with(|s| s.borrow_mut().ready.push_back(Box::new(f)));
}

/// Queues `f` to run once `delay` has elapsed on the current [`Clock`].
pub(crate) fn schedule_delay(delay: Duration, f: impl FnOnce() + 'static) {
    STATE.with(|s| {
        let mut s = s.borrow_mut();
        let deadline = s.clock.now() + delay;
        let seq = s.next_seq;
        s.next_seq += 1;
        s.timers.push(Timer { deadline, seq, callback: Box::new(f) });
    });
}

/// Installs `clock` as the active clock for this thread for as long as the
/// returned guard is alive, restoring the previous one when it drops.
pub fn use_clock(clock: impl Clock + 'static) -> ClockGuard {
    let previous = STATE.with(|s| std::mem::replace(&mut s.borrow_mut().clock, Rc::new(clock)));
    ClockGuard { previous: Some(previous) }
}

pub struct ClockGuard {
    previous: Option<Rc<dyn Clock>>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            STATE.with(|s| s.borrow_mut().clock = previous);
        }
    }
}

/// Runs one unit of ready work — an immediately-schedulable callback if one
/// is queued, otherwise the earliest due timer — and reports whether it
/// found anything to run. If nothing is ready but a timer is pending on a
/// real clock, blocks until it comes due rather than reporting idle.
pub(crate) fn pump() -> bool {
    loop {
        let next_ready = STATE.with(|s| s.borrow_mut().ready.pop_front());
        if let Some(cb) = next_ready {
            cb();
            return true;
        }

        let due = STATE.with(|s| {
            let mut s = s.borrow_mut();
            let now = s.clock.now();
            let due_index = s
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.deadline <= now)
                .min_by_key(|(_, t)| (t.deadline, t.seq))
                .map(|(i, _)| i);
            due_index.map(|i| s.timers.remove(i))
        });
        if let Some(timer) = due {
            (timer.callback)();
            return true;
        }

        let next_deadline = STATE.with(|s| s.borrow().timers.iter().map(|t| t.deadline).min());
        match next_deadline {
            Some(deadline) => {
                let clock = STATE.with(|s| Rc::clone(&s.borrow().clock));
                clock.block_until(deadline);
                continue;
            }
            None => return false,
        }
    }
}

/// Suspends for `duration` on the active [`Clock`]. Cancelled (the timer is
/// skipped rather than removed) if the fiber is interrupted first.
pub fn delay<E: 'static>(duration: Duration) -> crate::effect::Effect<E, ()> {
    crate::effect::Effect::r#async(move |cs| {
        let cancelled = Rc::new(Cell::new(false));
        let cancelled_for_abort = Rc::clone(&cancelled);
        cs.set_abort(move || cancelled_for_abort.set(true));
        schedule_delay(duration, move || {
            if !cancelled.get() {
                cs.resume_later(());
            }
        });
    })
}
