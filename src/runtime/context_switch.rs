//! The handle an `async` registration function uses to settle its effect.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::cause::Cause;
use crate::effect::{erase_cause, AnyBox, DynOutcome};
use crate::runtime::RuntimeInner;

pub(crate) type AbortSlot = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

/// Type-erased context switch handle, shared between the suspended fiber's
/// [`crate::runtime::frame::Frame`] stack (for `interrupt` to reach the
/// abort callback) and whatever external code eventually settles it.
#[derive(Clone)]
pub(crate) struct DynContextSwitch {
    runtime: Rc<RuntimeInner>,
    settled: Rc<Cell<bool>>,
    abort: AbortSlot,
}

impl DynContextSwitch {
    pub(crate) fn new(runtime: Rc<RuntimeInner>, abort: AbortSlot) -> Self {
        DynContextSwitch { runtime, settled: Rc::new(Cell::new(false)), abort }
    }

    /// Settles the effect exactly once; later calls are silently ignored,
    /// matching the idempotent-send convention of a one-shot channel.
    pub(crate) fn settle(&self, outcome: DynOutcome) {
        if self.settled.replace(true) {
            log::debug!("context switch settled more than once; ignoring the extra call");
            return;
        }
        self.runtime.resume_raw(outcome);
    }

    pub(crate) fn set_abort(&self, f: Box<dyn FnOnce()>) {
        *self.abort.borrow_mut() = Some(f);
    }

    pub(crate) fn is_interruptible(&self) -> bool {
        self.runtime.current_mask() == 0
    }
}

/// A statically typed handle handed to the registration function of an
/// [`crate::effect::Effect::r#async`] effect. Call [`ContextSwitch::resume`]
/// or [`ContextSwitch::fail`] exactly once, synchronously or from a later
/// callback, to settle it.
pub struct ContextSwitch<E, A> {
    dyn_cs: DynContextSwitch,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for ContextSwitch<E, A> {
    fn clone(&self) -> Self {
        ContextSwitch { dyn_cs: self.dyn_cs.clone(), _marker: PhantomData }
    }
}

impl<E: 'static, A: 'static> ContextSwitch<E, A> {
    pub(crate) fn from_dyn(dyn_cs: DynContextSwitch) -> Self {
        ContextSwitch { dyn_cs, _marker: PhantomData }
    }

    /// Settles the effect with a success value.
    pub fn resume(&self, a: A) {
        self.dyn_cs.settle(DynOutcome::Value(Box::new(a) as AnyBox));
    }

    /// Settles the effect with a success value via the host's next-tick
    /// mechanism rather than inline. Guarantees the caller's own turn runs
    /// to completion first even if `a` is already in hand, so a resumed
    /// fiber can never starve whoever is about to yield control back to the
    /// scheduler.
    pub fn resume_later(&self, a: A) {
        let dyn_cs = self.dyn_cs.clone();
        crate::scheduler::schedule(move || {
            dyn_cs.settle(DynOutcome::Value(Box::new(a) as AnyBox));
        });
    }

    /// Settles the effect with a typed failure.
    pub fn fail(&self, cause: Cause<E>) {
        self.dyn_cs.settle(DynOutcome::Failed(erase_cause(cause)));
    }

    /// Registers a callback to run if this effect is interrupted while
    /// suspended, so the external operation it represents (a socket read, a
    /// timer) can be cancelled. At most one abort callback is kept; a later
    /// call replaces an earlier one.
    pub fn set_abort(&self, f: impl FnOnce() + 'static) {
        self.dyn_cs.set_abort(Box::new(f));
    }

    /// Whether the fiber is currently interruptible (i.e. not inside a
    /// `critical` region) at the moment this effect suspended.
    pub fn is_interruptible(&self) -> bool {
        self.dyn_cs.is_interruptible()
    }
}
