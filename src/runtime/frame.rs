//! The call-frame stack the interpreter walks while driving an effect tree.
//!
//! Unlike a host call stack, this one is data: it can be saved when a fiber
//! suspends on an `async` node and restored verbatim, from any call site,
//! when [`crate::runtime::RuntimeInner::resume`] fires later.

use crate::effect::{DynCause, DynEffect, DynOutcome};

/// One pending obligation left behind by a combinator as the driver
/// descends into its left-hand effect.
pub(crate) enum Frame {
    /// From `chain`: apply to a success value, skip on failure/interruption.
    Chain(Box<dyn FnOnce(crate::effect::AnyBox) -> DynEffect>),
    /// From `chain_error`: apply to a failure cause, skip otherwise.
    ChainError(Box<dyn FnOnce(DynCause) -> DynEffect>),
    /// From `on_done`: always invoked. Receives the settling outcome and
    /// hands it back unchanged alongside the finalizing effect to run.
    Finalize(Box<dyn FnOnce(DynOutcome) -> (DynOutcome, DynEffect)>),
    /// From `on_interrupted`: invoked only while propagating `Interrupted`.
    Interrupt(Box<dyn FnOnce() -> DynEffect>),
    /// From `critical`: marks the end of an uninterruptible region.
    CriticalExit,
    /// Pushed internally by the driver itself around a finalizer or
    /// interrupt handler so that, once it settles, the outcome it was
    /// wrapping resumes propagating. Never constructed by combinators.
    ResumeOutcome(DynOutcome),
}
