//! Forking, joining, and interrupting independently scheduled fibers.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::cause::{Cause, Never, Outcome};
use crate::effect::{clone_outcome_for_waiter, AnyBox, DynNode, Effect};
use crate::runtime::context_switch::DynContextSwitch;
use crate::runtime::RuntimeInner;
use crate::scheduler;

/// A handle to a computation started by [`fork`], running independently of
/// whoever forked it. Dropping a `Fiber` does not cancel it — it keeps
/// running to completion on its own schedule until [`Fiber::interrupt`] is
/// called, the same way a detached thread would.
pub struct Fiber<E, A> {
    inner: Rc<RuntimeInner>,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Fiber { inner: Rc::clone(&self.inner), _marker: PhantomData }
    }
}

impl<E: 'static, A: 'static> Fiber<E, A> {
    pub(crate) fn new(inner: Rc<RuntimeInner>) -> Self {
        Fiber { inner, _marker: PhantomData }
    }

    /// Awaits this fiber's terminal [`Outcome`], without re-raising a
    /// failure or interruption onto the caller. Can be called from more
    /// than one place; each caller gets its own copy of the result.
    pub fn wait(&self) -> Effect<Never, Outcome<E, A>>
    where
        E: Clone,
        A: Clone,
    {
        let inner = Rc::clone(&self.inner);
        Effect::from_node(DynNode::Async(Box::new(move |dyn_cs: DynContextSwitch| {
            let dyn_cs_for_listener = dyn_cs.clone();
            let token = inner.on_settled(move |outcome_ref| {
                let cloned = crate::effect::unerase_outcome::<E, A>(clone_outcome_for_waiter::<E, A>(outcome_ref));
                dyn_cs_for_listener.settle(Outcome::Value(Box::new(cloned) as AnyBox));
            });
            let inner_for_abort = Rc::clone(&inner);
            dyn_cs.set_abort(Box::new(move || inner_for_abort.unlisten(token)));
        })))
    }

    /// Awaits this fiber and re-raises its failure or interruption onto the
    /// caller, unwrapping a plain success value.
    pub fn join(&self) -> Effect<E, A>
    where
        E: Clone,
        A: Clone,
    {
        self.wait()
            .widen_error::<E>()
            .chain(|outcome| match outcome {
                Outcome::Value(a) => Effect::of(a),
                Outcome::Failed(cause) => Effect::raised(cause),
                // The joined fiber was cancelled, not the joiner: surface
                // that as a defect the joiner can still `chain_error` on,
                // rather than silently propagating an interrupt of our own.
                Outcome::Interrupted => Effect::raised(Cause::Abort(crate::cause::Defect::new(
                    "joined fiber was interrupted".to_string(),
                ))),
            })
    }

    /// Requests that this fiber stop. If it is currently inside a
    /// `critical` region the request is latched and delivered as soon as
    /// that region ends; if it has not had its first turn on the scheduler
    /// yet, it never runs at all.
    pub fn interrupt(&self) -> Effect<Never, ()> {
        let inner = Rc::clone(&self.inner);
        Effect::suspend(move || inner.interrupt())
    }

    /// [`Fiber::interrupt`] followed by [`Fiber::wait`] — the common case of
    /// wanting confirmation that the fiber has actually finished unwinding
    /// (its finalizers have run) before moving on.
    pub fn interrupt_and_wait(&self) -> Effect<Never, Outcome<E, A>>
    where
        E: Clone,
        A: Clone,
    {
        let fiber = self.clone();
        self.interrupt().chain(move |_| fiber.wait())
    }
}

/// Starts `effect` running as its own fiber on the scheduler's next tick
/// and returns a handle to it immediately, without waiting for it to make
/// any progress.
pub fn fork<Err: 'static, Val: 'static>(effect: Effect<Err, Val>) -> Effect<Never, Fiber<Err, Val>> {
    Effect::suspend(move || {
        let inner = RuntimeInner::new();
        let node = effect.into_node();
        let fiber = Fiber::new(Rc::clone(&inner));
        scheduler::schedule(move || inner.start(node));
        fiber
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::scheduler::MockClock;

    #[test]
    fn fork_then_join_returns_the_value() {
        let clock = MockClock::new();
        let _guard = scheduler::use_clock(clock);
        let program: Effect<Never, i32> = fork(Effect::<Never, i32>::of(41))
            .chain(|fiber| fiber.join().map(|v| v + 1));
        let rt = Runtime::new();
        assert_eq!(rt.run_to_completion(program), Outcome::Value(42));
    }

    #[test]
    fn interrupted_fiber_is_observed_as_interrupted() {
        let clock = MockClock::new();
        let _guard = scheduler::use_clock(clock);
        let program: Effect<Never, Outcome<Never, i32>> = fork(Effect::<Never, i32>::r#async(|_cs| {
            // never settles on its own; must be interrupted.
        }))
        .chain(|fiber| fiber.interrupt_and_wait());
        let rt = Runtime::new();
        let out = rt.run_to_completion(program);
        assert_eq!(out, Outcome::Value(Outcome::Interrupted));
    }
}
