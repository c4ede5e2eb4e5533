//! The cooperative, single-threaded driver that walks an effect tree.
//!
//! [`RuntimeInner`] owns the call-frame [`Frame`] stack for one fiber and
//! implements the trampoline in [`RuntimeInner::drive`]: it never recurses
//! into itself, so a suspension on an `async` node can be saved as plain
//! data and handed back to [`RuntimeInner::resume_raw`] from any call site
//! — a timer callback, another fiber, or a synchronous call arriving while
//! `drive` is still on the stack.

pub(crate) mod context_switch;
pub(crate) mod frame;

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::cause::{Cause, Defect, Outcome};
use crate::effect::{unerase_outcome, DynEffect, DynNode, DynOutcome, Effect};
use crate::error::RuntimeError;
use crate::one_shot::OneShot;
use context_switch::{AbortSlot, DynContextSwitch};
use frame::Frame;

enum Work {
    Eval(DynEffect),
    Prop(DynOutcome),
}

struct Suspension {
    stack: Vec<Frame>,
    mask: u32,
    abort: AbortSlot,
}

enum State {
    NotStarted,
    Suspended(Suspension),
    Finished,
}

/// Internal fiber state: the frame stack, interruption bookkeeping, and the
/// result [`OneShot`] observed by [`crate::fiber::Fiber::wait`].
pub(crate) struct RuntimeInner {
    state: RefCell<State>,
    result: OneShot<DynOutcome>,
    running: Cell<bool>,
    reentry: RefCell<Option<(DynOutcome, Vec<Frame>, u32)>>,
    interrupt_pending: Cell<bool>,
    started: Cell<bool>,
}

enum LoopEnd {
    Done(DynOutcome),
    Suspended,
}

impl RuntimeInner {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(RuntimeInner {
            state: RefCell::new(State::NotStarted),
            result: OneShot::new(),
            running: Cell::new(false),
            reentry: RefCell::new(None),
            interrupt_pending: Cell::new(false),
            started: Cell::new(false),
        })
    }

    pub(crate) fn start(self: &Rc<Self>, node: DynEffect) {
        if self.started.replace(true) {
            log::error!("RuntimeInner::start called more than once on the same fiber");
            panic!("a fiber can only be started once");
        }
        // May already be Finished if interrupt() fired before this fiber
        // got its first turn on the scheduler; in that case it never runs.
        if self.result.is_set() {
            return;
        }
        self.drive(Work::Eval(node), Vec::new(), 0);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.result.is_set()
    }

    pub(crate) fn current_mask(&self) -> u32 {
        match &*self.state.borrow() {
            State::Suspended(s) => s.mask,
            _ => 0,
        }
    }

    /// Invokes `cb` once this fiber settles, immediately if it already has.
    /// Returns a token that can be fed back to `unlisten` if the caller goes
    /// away before this fiber settles (see [`context_switch::ContextSwitch::set_abort`]
    /// call sites in `Fiber::wait`).
    pub(crate) fn on_settled(&self, cb: impl FnOnce(&DynOutcome) + 'static) -> crate::one_shot::ListenToken {
        self.result.listen(cb)
    }

    pub(crate) fn unlisten(&self, token: crate::one_shot::ListenToken) {
        self.result.unlisten(token);
    }

    /// Entry point for a [`context_switch::DynContextSwitch`] settling an
    /// outstanding `async` node, and for [`RuntimeInner::interrupt`]
    /// resuming a suspended fiber with `Outcome::Interrupted`.
    pub(crate) fn resume_raw(self: &Rc<Self>, outcome: DynOutcome) {
        let prev = self.state.replace(State::NotStarted);
        match prev {
            State::Suspended(susp) => self.drive(Work::Prop(outcome), susp.stack, susp.mask),
            other => *self.state.borrow_mut() = other,
        }
    }

    pub(crate) fn interrupt(self: &Rc<Self>) {
        let prev = self.state.replace(State::NotStarted);
        match prev {
            State::Finished => *self.state.borrow_mut() = State::Finished,
            // Not yet started: it will never run at all now.
            State::NotStarted => self.settle_done(Outcome::Interrupted),
            State::Suspended(susp) => {
                if susp.mask > 0 {
                    self.interrupt_pending.set(true);
                    *self.state.borrow_mut() = State::Suspended(susp);
                } else {
                    match susp.abort.borrow_mut().take() {
                        Some(abort) => abort(),
                        None => {
                            log::error!(
                                "interrupting an async boundary that never installed an abort hook"
                            );
                            panic!("ContextSwitch interrupted without a prior set_abort");
                        }
                    }
                    self.drive(Work::Prop(Outcome::Interrupted), susp.stack, susp.mask);
                }
            }
        }
    }

    fn settle_done(self: &Rc<Self>, outcome: DynOutcome) {
        *self.state.borrow_mut() = State::Finished;
        self.result.set(outcome);
    }

    /// The trampoline. Never recurses: a register() callback that settles
    /// its context switch synchronously is detected via `running` and
    /// stashed in `reentry` rather than driven on a fresh stack frame.
    fn drive(self: &Rc<Self>, work: Work, stack: Vec<Frame>, mask: u32) {
        if self.running.replace(true) {
            let outcome = match work {
                Work::Prop(o) => o,
                Work::Eval(_) => unreachable!("reentrant drive only arrives via resume_raw"),
            };
            *self.reentry.borrow_mut() = Some((outcome, stack, mask));
            return;
        }

        let mut work = work;
        let mut stack = stack;
        let mut mask = mask;
        loop {
            let end = self.run_one_segment(work, &mut stack, &mut mask);
            match end {
                LoopEnd::Done(outcome) => {
                    self.settle_done(outcome);
                    break;
                }
                LoopEnd::Suspended => match self.reentry.borrow_mut().take() {
                    Some((outcome, new_stack, new_mask)) => {
                        work = Work::Prop(outcome);
                        stack = new_stack;
                        mask = new_mask;
                    }
                    None => break,
                },
            }
        }
        self.running.set(false);
    }

    fn run_one_segment(self: &Rc<Self>, mut work: Work, stack: &mut Vec<Frame>, mask: &mut u32) -> LoopEnd {
        loop {
            work = match work {
                Work::Eval(node) => match *node {
                    DynNode::Of(v) => Work::Prop(Outcome::Value(v)),
                    DynNode::Failed(c) => Work::Prop(Outcome::Failed(c)),
                    DynNode::Raised(c) => Work::Prop(Outcome::Failed(c)),
                    DynNode::Interrupted => Work::Prop(Outcome::Interrupted),
                    DynNode::Suspend(thunk) => match panic::catch_unwind(AssertUnwindSafe(thunk)) {
                        Ok(v) => Work::Prop(Outcome::Value(v)),
                        Err(payload) => {
                            log::error!("suspended thunk panicked; captured as a defect");
                            Work::Prop(Outcome::Failed(Cause::Abort(Defect::from_panic(payload))))
                        }
                    },
                    DynNode::Critical(inner) => {
                        *mask += 1;
                        stack.push(Frame::CriticalExit);
                        Work::Eval(inner)
                    }
                    DynNode::Chain(inner, f) => {
                        stack.push(Frame::Chain(f));
                        Work::Eval(inner)
                    }
                    DynNode::ChainError(inner, f) => {
                        stack.push(Frame::ChainError(f));
                        Work::Eval(inner)
                    }
                    DynNode::OnDone(inner, f) => {
                        stack.push(Frame::Finalize(f));
                        Work::Eval(inner)
                    }
                    DynNode::OnInterrupted(inner, f) => {
                        stack.push(Frame::Interrupt(f));
                        Work::Eval(inner)
                    }
                    DynNode::Async(register) => {
                        let abort: AbortSlot = Rc::new(RefCell::new(None));
                        *self.state.borrow_mut() = State::Suspended(Suspension {
                            stack: std::mem::take(stack),
                            mask: *mask,
                            abort: abort.clone(),
                        });
                        let dyn_cs = DynContextSwitch::new(Rc::clone(self), abort);
                        let dyn_cs_for_call = dyn_cs.clone();
                        match panic::catch_unwind(AssertUnwindSafe(move || register(dyn_cs_for_call))) {
                            Ok(()) => return LoopEnd::Suspended,
                            Err(payload) => {
                                log::error!("async register function panicked; captured as a defect");
                                // The register function never got a chance to
                                // settle this context switch; reclaim the
                                // stack we just parked in `Suspended` rather
                                // than leaving the fiber stranded there.
                                let prev = self.state.replace(State::NotStarted);
                                let (recovered_stack, recovered_mask) = match prev {
                                    State::Suspended(s) => (s.stack, s.mask),
                                    other => {
                                        *self.state.borrow_mut() = other;
                                        (Vec::new(), 0)
                                    }
                                };
                                *stack = recovered_stack;
                                *mask = recovered_mask;
                                Work::Prop(Outcome::Failed(Cause::Abort(Defect::from_panic(payload))))
                            }
                        }
                    }
                },
                Work::Prop(outcome) => match stack.pop() {
                    None => return LoopEnd::Done(outcome),
                    Some(Frame::Chain(f)) => match outcome {
                        Outcome::Value(v) => Work::Eval(f(v)),
                        other => Work::Prop(other),
                    },
                    Some(Frame::ChainError(f)) => match outcome {
                        Outcome::Failed(c) => Work::Eval(f(c)),
                        other => Work::Prop(other),
                    },
                    Some(Frame::Finalize(f)) => {
                        // Finalizers run inside an implicit critical section
                        // (as if wrapped in `critical`) so cleanup can never
                        // itself be cut short by an interrupt arriving while
                        // it runs.
                        let (outcome, finalizer) = f(outcome);
                        stack.push(Frame::ResumeOutcome(outcome));
                        *mask += 1;
                        stack.push(Frame::CriticalExit);
                        Work::Eval(finalizer)
                    }
                    Some(Frame::Interrupt(f)) => match outcome {
                        Outcome::Interrupted => {
                            stack.push(Frame::ResumeOutcome(Outcome::Interrupted));
                            *mask += 1;
                            stack.push(Frame::CriticalExit);
                            Work::Eval(f())
                        }
                        other => Work::Prop(other),
                    },
                    Some(Frame::CriticalExit) => {
                        *mask = mask.saturating_sub(1);
                        let outcome = if *mask == 0 && self.interrupt_pending.take() {
                            Outcome::Interrupted
                        } else {
                            outcome
                        };
                        Work::Prop(outcome)
                    }
                    Some(Frame::ResumeOutcome(pending)) => {
                        let resumed = match outcome {
                            Outcome::Failed(finalizer_cause) => match pending {
                                Outcome::Failed(original) => Outcome::Failed(original.and(finalizer_cause)),
                                Outcome::Value(_) => Outcome::Failed(finalizer_cause),
                                Outcome::Interrupted => {
                                    log::error!(
                                        "finalizer or interrupt handler failed while unwinding an interrupt; \
                                         dropping its cause since interruption always wins"
                                    );
                                    Outcome::Interrupted
                                }
                            },
                            _ => pending,
                        };
                        Work::Prop(resumed)
                    }
                },
            };
        }
    }
}

/// A standalone driver for running a single top-level effect to completion,
/// outside of any fiber someone else could join or interrupt. Convenient
/// for `main` and for tests; [`crate::fiber::fork`] is the entry point for
/// concurrent, joinable, interruptible fibers.
pub struct Runtime {
    _private: (),
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Runtime { _private: () }
    }

    /// Drives `effect` to completion, pumping the global scheduler (timers,
    /// deferred callbacks) as needed. Panics if the effect suspends with no
    /// pending scheduler work left to make progress — that indicates a
    /// leaked `async` registration that never calls `resume`/`fail`.
    pub fn run_to_completion<E: 'static, A: 'static>(&self, effect: Effect<E, A>) -> Outcome<E, A> {
        match self.try_run_to_completion(effect) {
            Ok(outcome) => outcome,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`Runtime::run_to_completion`], but reports a starved scheduler
    /// as a [`RuntimeError`] instead of panicking — for hosts that would
    /// rather surface the condition to a caller than abort the process.
    pub fn try_run_to_completion<E: 'static, A: 'static>(
        &self,
        effect: Effect<E, A>,
    ) -> Result<Outcome<E, A>, RuntimeError> {
        let inner = RuntimeInner::new();
        inner.start(effect.into_node());
        loop {
            if let Some(outcome) = inner.result.take() {
                return Ok(unerase_outcome(outcome));
            }
            if !crate::scheduler::pump() {
                return Err(RuntimeError::Starved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Never;
    use crate::fiber::fork;

    fn tick() -> Effect<Never, ()> {
        Effect::r#async(|cs: context_switch::ContextSwitch<Never, ()>| {
            crate::scheduler::schedule(move || cs.resume(()));
        })
    }

    #[test]
    #[should_panic(expected = "without a prior set_abort")]
    fn interrupting_a_suspended_async_with_no_abort_hook_is_fatal() {
        let program = fork(Effect::<Never, ()>::r#async(|_cs| {
            // deliberately never installs an abort hook
        }))
        .chain(|fiber| tick().chain(move |_| fiber.interrupt()));
        Runtime::new().run_to_completion(program);
    }

    #[test]
    fn starved_scheduler_is_reported_not_panicked_via_try_run_to_completion() {
        let program = Effect::<Never, ()>::r#async(|_cs| {
            // never settles and nothing is ever scheduled to resume it
        });
        let result = Runtime::new().try_run_to_completion(program);
        assert!(matches!(result, Err(RuntimeError::Starved)));
    }

    #[test]
    #[should_panic(expected = "effect suspended with no scheduled work left to resume it")]
    fn starved_scheduler_panics_via_run_to_completion() {
        let program = Effect::<Never, ()>::r#async(|_cs| {});
        Runtime::new().run_to_completion(program);
    }
}
