//! An async cell filled at most once.

use std::rc::Rc;

use crate::cause::Never;
use crate::effect::Effect;
use crate::one_shot::OneShot;
use crate::runtime::context_switch::ContextSwitch;

/// A cell that starts empty and is filled exactly once; any number of
/// fibers can [`Deferred::wait`] on it, before or after it fills, and each
/// gets its own copy of the value once it is available.
///
/// Built directly on [`OneShot`]: `wait` is an `async` registration that
/// listens on the underlying cell and deregisters via `set_abort` if the
/// waiting fiber is interrupted first, so an abandoned wait never leaks a
/// listener closure.
pub struct Deferred<A> {
    cell: Rc<OneShot<A>>,
}

impl<A> Clone for Deferred<A> {
    fn clone(&self) -> Self {
        Deferred { cell: Rc::clone(&self.cell) }
    }
}

impl<A> Default for Deferred<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Deferred<A> {
    pub fn new() -> Self {
        Deferred { cell: Rc::new(OneShot::new()) }
    }

    /// Whether two handles refer to the same underlying cell. Used by
    /// [`crate::sync::semaphore::Semaphore`] to find and un-queue a waiter
    /// that was interrupted before it was granted.
    pub(crate) fn same_cell(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Fills the cell synchronously, without going through the effect
    /// algebra. Only meant for callers (like `Semaphore`) that are already
    /// running inside an effect step and know filling a `Deferred` cannot
    /// itself suspend.
    pub(crate) fn fill_now(&self, value: A) {
        self.cell.set(value);
    }

    /// Registers a raw listener on the underlying cell, bypassing the effect
    /// algebra. Lets `Semaphore` attach its own `set_abort` that both
    /// deregisters this listener and un-queues the waiter, which plain
    /// [`Deferred::wait`] cannot do since it only knows about the cell.
    pub(crate) fn listen_raw(&self, f: impl FnOnce(&A) + 'static) -> crate::one_shot::ListenToken {
        self.cell.listen(f)
    }

    pub(crate) fn unlisten_raw(&self, token: crate::one_shot::ListenToken) {
        self.cell.unlisten(token);
    }
}

impl<A: 'static> Deferred<A> {
    /// Fills the cell. A second `fill` is a programmer error: a `Deferred`
    /// promises exactly one answer, not a stream of them. Built on `chain`
    /// rather than `suspend` deliberately — `suspend` exists to turn *host*
    /// exceptions into a recoverable `Abort` cause, but a double `fill` is
    /// the crate's own fatal misuse condition (see `OneShot::set`) and must
    /// panic straight through instead of being swallowed into the cause
    /// channel.
    pub fn fill(&self, value: A) -> Effect<Never, ()> {
        let this = self.clone();
        Effect::of(()).chain(move |_| {
            this.fill_now(value);
            Effect::of(())
        })
    }

    pub fn is_empty(&self) -> Effect<Never, bool> {
        let cell = Rc::clone(&self.cell);
        Effect::suspend(move || !cell.is_set())
    }

    pub fn is_full(&self) -> Effect<Never, bool> {
        let cell = Rc::clone(&self.cell);
        Effect::suspend(move || cell.is_set())
    }

    /// Waits for the cell to fill, or until this fiber is interrupted, in
    /// which case the pending listener is deregistered and never fires.
    pub fn wait(&self) -> Effect<Never, A>
    where
        A: Clone,
    {
        let cell = Rc::clone(&self.cell);
        Effect::r#async(move |cs: ContextSwitch<Never, A>| {
            let cs_for_listener = cs.clone();
            let cell_for_abort = Rc::clone(&cell);
            let token = cell.listen(move |value: &A| {
                cs_for_listener.resume(value.clone());
            });
            cs.set_abort(move || cell_for_abort.unlisten(token));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Outcome;
    use crate::fiber::fork;
    use crate::runtime::Runtime;
    use crate::scheduler::{self, MockClock};

    #[test]
    fn wait_after_fill_resolves_immediately() {
        let d: Deferred<i32> = Deferred::new();
        let rt = Runtime::new();
        let out = rt.run_to_completion(d.fill(7).chain(move |_| d.wait()));
        assert_eq!(out, Outcome::Value(7));
    }

    #[test]
    fn wait_before_fill_resolves_once_another_fiber_fills_it() {
        let clock = MockClock::new();
        let _guard = scheduler::use_clock(clock);
        let d: Deferred<i32> = Deferred::new();
        let d2 = d.clone();
        let program = fork(d2.fill(9)).chain(move |_fiber| d.wait());
        let rt = Runtime::new();
        assert_eq!(rt.run_to_completion(program), Outcome::Value(9));
    }

    #[test]
    #[should_panic(expected = "OneShot::set called twice")]
    fn filling_twice_panics() {
        let d: Deferred<i32> = Deferred::new();
        let rt = Runtime::new();
        rt.run_to_completion(d.fill(1).chain(move |_| d.fill(2)));
    }
}
