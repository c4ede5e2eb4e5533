//! A counting, FIFO-fair gate built from [`Deferred`] and a plain queue.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::cause::Never;
use crate::effect::Effect;
use crate::runtime::context_switch::ContextSwitch;
use crate::sync::deferred::Deferred;

struct Waiter {
    requested: usize,
    deferred: Deferred<()>,
}

struct State {
    count: usize,
    waiters: VecDeque<Waiter>,
}

/// A counting semaphore: `count` permits are available to acquire in bulk,
/// and waiters that cannot yet be satisfied queue up in strict FIFO order.
///
/// "FIFO order" here means more than first-in-first-served: the head waiter
/// must become fully satisfiable before any later waiter is woken, even if
/// that later waiter asks for fewer permits than are currently free. This
/// keeps a waiter that asked for a large batch from starving behind a stream
/// of small requests.
pub struct Semaphore {
    state: Rc<RefCell<State>>,
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Semaphore { state: Rc::clone(&self.state) }
    }
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Semaphore { state: Rc::new(RefCell::new(State { count: initial, waiters: VecDeque::new() })) }
    }

    /// The number of permits currently free for immediate acquisition.
    pub fn count(&self) -> Effect<Never, usize> {
        let state = Rc::clone(&self.state);
        Effect::suspend(move || state.borrow().count)
    }

    /// Acquires one permit, queuing if none is free.
    pub fn acquire(&self) -> Effect<Never, ()> {
        self.acquire_n(1)
    }

    /// Acquires `n` permits at once, queuing if fewer than `n` are free.
    pub fn acquire_n(&self, n: usize) -> Effect<Never, ()> {
        let sem_for_check = self.clone();
        let sem_for_wait = self.clone();
        Effect::suspend(move || {
            let mut s = sem_for_check.state.borrow_mut();
            if s.count >= n {
                s.count -= n;
                None
            } else {
                let deferred = Deferred::new();
                s.waiters.push_back(Waiter { requested: n, deferred: deferred.clone() });
                Some(deferred)
            }
        })
        .chain(move |queued| match queued {
            None => Effect::of(()),
            Some(deferred) => sem_for_wait.wait_for(deferred),
        })
    }

    /// Non-blocking: acquires `n` permits if immediately available, reports
    /// failure otherwise without queuing.
    pub fn try_acquire_n(&self, n: usize) -> Effect<Never, bool> {
        let state = Rc::clone(&self.state);
        Effect::suspend(move || {
            let mut s = state.borrow_mut();
            if s.count >= n {
                s.count -= n;
                true
            } else {
                false
            }
        })
    }

    /// Releases one permit, waking queued waiters as far as FIFO fairness
    /// allows.
    pub fn release(&self) -> Effect<Never, ()> {
        self.release_n(1)
    }

    /// Releases `n` permits, then drains the waiter queue from the head
    /// while the next waiter's full request can be satisfied.
    pub fn release_n(&self, n: usize) -> Effect<Never, ()> {
        let state = Rc::clone(&self.state);
        Effect::suspend(move || {
            let mut s = state.borrow_mut();
            s.count += n;
            while let Some(w) = s.waiters.front() {
                if w.requested > s.count {
                    break;
                }
                let w = s.waiters.pop_front().expect("just peeked");
                s.count -= w.requested;
                w.deferred.fill_now(());
            }
        })
    }

    /// Runs `action` after acquiring one permit, guaranteeing its release on
    /// any exit (success, failure, or interruption).
    pub fn with_permit<E: 'static, A: 'static>(&self, action: Effect<E, A>) -> Effect<E, A> {
        self.with_permits_n(1, action)
    }

    /// Runs `action` after acquiring `n` permits, guaranteeing their release
    /// on any exit. If interruption arrives while still queued, nothing is
    /// released: `action` never ran, and no permits were ever held.
    pub fn with_permits_n<E: 'static, A: 'static>(&self, n: usize, action: Effect<E, A>) -> Effect<E, A> {
        let sem = self.clone();
        self.acquire_n(n).widen_error::<E>().chain(move |_| {
            action.on_done(move |_outcome| {
                log::trace!("releasing {n} semaphore permit(s) after scope exit");
                sem.release_n(n)
            })
        })
    }

    /// Builds the `async` node a queued waiter suspends on: resumes once
    /// `deferred` fills, and on interruption both unregisters that listener
    /// and un-queues the waiter so a released permit is never handed to an
    /// abandoned request.
    fn wait_for(&self, deferred: Deferred<()>) -> Effect<Never, ()> {
        let sem = self.clone();
        Effect::r#async(move |cs: ContextSwitch<Never, ()>| {
            let cs_for_listener = cs.clone();
            let token = deferred.listen_raw(move |_| cs_for_listener.resume(()));
            let deferred_for_abort = deferred.clone();
            cs.set_abort(move || {
                deferred_for_abort.unlisten_raw(token);
                sem.dequeue(&deferred_for_abort);
            });
        })
    }

    fn dequeue(&self, deferred: &Deferred<()>) {
        let mut s = self.state.borrow_mut();
        s.waiters.retain(|w| !w.deferred.same_cell(deferred));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Outcome;
    use crate::fiber::fork;
    use crate::runtime::Runtime;
    use crate::sync::Ref;

    /// Yields one turn through the global ready queue without touching the
    /// clock, so a just-`fork`ed fiber gets a chance to run before the test
    /// inspects shared state. A stand-in for a short `delay`, which here is
    /// about giving other fibers a turn, not about elapsed time.
    fn tick() -> Effect<Never, ()> {
        Effect::r#async(|cs: ContextSwitch<Never, ()>| {
            crate::scheduler::schedule(move || cs.resume(()));
        })
    }

    #[test]
    fn acquire_n_succeeds_immediately_when_enough_permits() {
        let sem = Semaphore::new(3);
        let rt = Runtime::new();
        let out = rt.run_to_completion(sem.acquire_n(3).chain(move |_| sem.count()));
        assert_eq!(out, Outcome::Value(0));
    }

    #[test]
    fn try_acquire_n_reports_success_and_failure() {
        let sem = Semaphore::new(2);
        let rt = Runtime::new();
        let a = sem.clone();
        let out = rt.run_to_completion(a.try_acquire_n(1).chain(move |ok| sem.count().map(move |c| (ok, c))));
        assert_eq!(out, Outcome::Value((true, 1)));

        let sem = Semaphore::new(2);
        let a = sem.clone();
        let out = rt.run_to_completion(a.try_acquire_n(3).chain(move |ok| sem.count().map(move |c| (ok, c))));
        assert_eq!(out, Outcome::Value((false, 2)));
    }

    #[test]
    fn with_permits_n_returns_all_permits() {
        let sem = Semaphore::new(2);
        let rt = Runtime::new();
        let sem2 = sem.clone();
        let out = rt.run_to_completion(
            sem.with_permits_n(2, Effect::<Never, i32>::of(42)).chain(move |v| sem2.count().map(move |c| (v, c))),
        );
        assert_eq!(out, Outcome::Value((42, 2)));
    }

    #[test]
    fn observable_acquisition_via_fork() {
        let sem = Semaphore::new(4);
        let sem2 = sem.clone();
        let program: Effect<Never, usize> =
            fork(sem.acquire_n(3)).chain(move |_fiber| tick().chain(move |_| sem2.count()));
        let rt = Runtime::new();
        assert_eq!(rt.run_to_completion(program), Outcome::Value(1));
    }

    #[test]
    fn interruptible_acquire_leaves_count_and_moved_flag_unchanged() {
        let sem = Semaphore::new(1);
        let moved = Ref::new(false);
        let sem_for_fork = sem.clone();
        let moved_for_fork = moved.clone();
        let program = fork(sem_for_fork.acquire_n(2).chain(move |_| moved_for_fork.set(true)))
            .chain(move |fiber| {
                tick().chain(move |_| {
                    fiber.interrupt_and_wait().chain(move |_| {
                        moved.get().chain(move |m| sem.count().map(move |c| (m, c)))
                    })
                })
            });
        let rt = Runtime::new();
        let out = rt.run_to_completion(program);
        assert_eq!(out, Outcome::Value((false, 1)));
    }

    #[test]
    fn interrupted_waiter_never_holds_permits_it_was_granted() {
        let sem = Semaphore::new(1);
        let moved = Ref::new(0i32);

        let sem1 = sem.clone();
        let moved1 = moved.clone();
        let sem2 = sem.clone();
        let moved2 = moved.clone();

        let program = fork(sem1.acquire_n(3).chain(move |_| moved1.set(1))).chain(move |fib1| {
            fork(sem2.acquire_n(1).chain(move |_| moved2.set(2))).chain(move |fib2| {
                fib1.interrupt_and_wait().chain(move |_| {
                    fib2.join().chain(move |_| moved.get().chain(move |m| sem.count().map(move |c| (m, c))))
                })
            })
        });
        let rt = Runtime::new();
        let out = rt.run_to_completion(program);
        assert_eq!(out, Outcome::Value((2, 0)));
    }

    #[test]
    fn fifo_waiter_with_larger_request_is_not_skipped() {
        let sem = Semaphore::new(0);
        let woken_small = Ref::new(false);

        let sem_big = sem.clone();
        let sem_small = sem.clone();
        let woken = woken_small.clone();

        // W1 wants 2, enqueued first; W2 wants 1, enqueued second.
        let program = fork(sem_big.acquire_n(2))
            .chain(move |_big_fiber| {
                fork(sem_small.acquire_n(1).chain(move |_| woken.set(true))).chain(move |_small_fiber| tick())
            })
            .chain(move |_| sem.release_n(1).chain(move |_| woken_small.get()));
        let rt = Runtime::new();
        // Releasing exactly 1 must not wake W2 (1 permit) ahead of W1 (2 permits).
        assert_eq!(rt.run_to_completion(program), Outcome::Value(false));
    }

    #[test]
    fn observable_blocking_release_wakes_waiter() {
        let sem = Semaphore::new(0);
        let advanced = Ref::new(false);
        let advanced_for_fiber = advanced.clone();
        let sem_for_fiber = sem.clone();

        let program = fork(sem_for_fiber.with_permit(advanced_for_fiber.set(true))).chain(move |fiber| {
            sem.release().chain(move |_| fiber.wait().chain(move |_| advanced.get()))
        });
        let rt = Runtime::new();
        assert_eq!(rt.run_to_completion(program), Outcome::Value(true));
    }
}
