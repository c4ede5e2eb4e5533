//! The public effect description type and its erased interpreter core.
//!
//! [`Effect<E, A>`] is a statically typed facade over a dynamically typed
//! tree of nodes (the dynamically-typed core an interpreter actually needs
//! to walk). Combinators box and downcast at the seam; everything above
//! that seam sees ordinary `E`/`A` types.

use std::any::Any;

use crate::cause::{Cause, Never, Outcome};
use crate::runtime::context_switch::{ContextSwitch, DynContextSwitch};

/// Type-erased payload. Every leaf value and every cause payload passes
/// through here once, at construction and again at the point a combinator
/// needs to hand it back to typed caller code.
pub(crate) type AnyBox = Box<dyn Any>;
pub(crate) type DynCause = Cause<AnyBox>;
pub(crate) type DynOutcome = Outcome<AnyBox, AnyBox>;
pub(crate) type DynEffect = Box<DynNode>;

pub(crate) fn downcast<T: 'static>(b: AnyBox) -> T {
    match b.downcast::<T>() {
        Ok(v) => *v,
        Err(_) => unreachable!("interpreter core downcast mismatch: type {} expected", std::any::type_name::<T>()),
    }
}

pub(crate) fn erase_cause<E: 'static>(c: Cause<E>) -> DynCause {
    c.map(|e| Box::new(e) as AnyBox)
}

pub(crate) fn unerase_cause<E: 'static>(c: DynCause) -> Cause<E> {
    c.map(downcast::<E>)
}

pub(crate) fn erase_outcome<E: 'static, A: 'static>(o: Outcome<E, A>) -> DynOutcome {
    match o {
        Outcome::Value(a) => Outcome::Value(Box::new(a)),
        Outcome::Failed(c) => Outcome::Failed(erase_cause(c)),
        Outcome::Interrupted => Outcome::Interrupted,
    }
}

pub(crate) fn unerase_outcome<E: 'static, A: 'static>(o: DynOutcome) -> Outcome<E, A> {
    match o {
        Outcome::Value(a) => Outcome::Value(downcast::<A>(a)),
        Outcome::Failed(c) => Outcome::Failed(unerase_cause(c)),
        Outcome::Interrupted => Outcome::Interrupted,
    }
}

/// The dynamically-typed node tree the runtime actually walks.
///
/// Every node is consumed by value when the runtime steps it, mirroring how
/// a `Future` is consumed by `poll`: an `Effect` describes a computation to
/// run once, not a value to replay.
pub(crate) enum DynNode {
    Of(AnyBox),
    Failed(DynCause),
    Raised(DynCause),
    Interrupted,
    Suspend(Box<dyn FnOnce() -> AnyBox>),
    Async(Box<dyn FnOnce(DynContextSwitch)>),
    Critical(DynEffect),
    Chain(DynEffect, Box<dyn FnOnce(AnyBox) -> DynEffect>),
    ChainError(DynEffect, Box<dyn FnOnce(DynCause) -> DynEffect>),
    OnDone(DynEffect, Box<dyn FnOnce(DynOutcome) -> (DynOutcome, DynEffect)>),
    OnInterrupted(DynEffect, Box<dyn FnOnce() -> DynEffect>),
}

/// A description of a computation that yields an `A` or fails with a
/// [`Cause<E>`]. Building an `Effect` does not run anything; only handing it
/// to a [`crate::runtime::Runtime`] (directly, or via
/// [`crate::fiber::fork`]) does.
pub struct Effect<E, A> {
    pub(crate) node: DynEffect,
    _marker: std::marker::PhantomData<fn() -> (E, A)>,
}

impl<E, A> Effect<E, A> {
    pub(crate) fn from_node(node: DynNode) -> Self {
        Effect { node: Box::new(node), _marker: std::marker::PhantomData }
    }

    pub(crate) fn into_node(self) -> DynEffect {
        self.node
    }
}

impl<E: 'static, A: 'static> Effect<E, A> {
    /// An effect that succeeds immediately with `a`.
    pub fn of(a: A) -> Self {
        Effect::from_node(DynNode::Of(Box::new(a)))
    }

    /// An effect that fails immediately with a typed error.
    pub fn failed(e: E) -> Self {
        Effect::from_node(DynNode::Failed(Cause::Raise(erase_cause_payload(e))))
    }

    /// An effect that fails immediately with an arbitrary, possibly composed
    /// [`Cause`] (used to resurface a cause captured by `on_done`/`chain_error`
    /// without re-wrapping it in another `Raise`).
    pub fn raised(cause: Cause<E>) -> Self {
        Effect::from_node(DynNode::Raised(erase_cause(cause)))
    }

    /// An effect that immediately interrupts the fiber running it, the same
    /// as if [`crate::fiber::Fiber::interrupt`] had been called on it from
    /// the outside. Bypasses the typed failure channel entirely: no
    /// `chain_error` handler downstream observes this, only `on_done` and
    /// `on_interrupted`.
    pub fn interrupt() -> Self {
        Effect::from_node(DynNode::Interrupted)
    }

    /// Defers evaluation of `thunk` until the effect runs, and turns a panic
    /// inside it into an [`Cause::Abort`] defect instead of unwinding past
    /// the runtime.
    pub fn suspend(thunk: impl FnOnce() -> A + 'static) -> Self {
        Effect::from_node(DynNode::Suspend(Box::new(move || {
            Box::new(thunk()) as AnyBox
        })))
    }

    /// An effect whose result is produced by a callback rather than
    /// returned directly, suspending the fiber until someone calls
    /// [`ContextSwitch::resume`] or [`ContextSwitch::fail`].
    pub fn r#async(register: impl FnOnce(ContextSwitch<E, A>) + 'static) -> Self {
        Effect::from_node(DynNode::Async(Box::new(move |dyn_cs| {
            register(ContextSwitch::from_dyn(dyn_cs))
        })))
    }

    /// Marks a region as uninterruptible for as long as it runs; an
    /// interrupt request arriving during it is latched and delivered as soon
    /// as the region completes or next yields to an interruptible effect.
    pub fn critical(self) -> Self {
        Effect::from_node(DynNode::Critical(self.into_node()))
    }

    /// Sequences `self` into `f`, which receives the success value and
    /// produces the effect to run next. Short-circuits on failure or
    /// interruption without invoking `f`.
    pub fn chain<B: 'static>(self, f: impl FnOnce(A) -> Effect<E, B> + 'static) -> Effect<E, B> {
        Effect::from_node(DynNode::Chain(
            self.into_node(),
            Box::new(move |a| f(downcast::<A>(a)).into_node()),
        ))
    }

    /// Sequences `self` into `f` on failure, which receives the cause and
    /// produces a recovery effect. Short-circuits a success without invoking
    /// `f`. `f` is not invoked on interruption.
    pub fn chain_error<E2: 'static>(
        self,
        f: impl FnOnce(Cause<E>) -> Effect<E2, A> + 'static,
    ) -> Effect<E2, A> {
        Effect::from_node(DynNode::ChainError(
            self.into_node(),
            Box::new(move |c| f(unerase_cause::<E>(c)).into_node()),
        ))
    }

    /// Runs `finalizer` after `self` completes, no matter whether it
    /// succeeded, failed, or was interrupted. The finalizer cannot itself
    /// fail with a typed error ([`Never`]); a panic inside it is captured as
    /// an [`Cause::Abort`] and composed onto whatever cause was already
    /// propagating via [`Cause::and`]. The original outcome is what
    /// continues to propagate; the finalizer's own success value is
    /// discarded, only a defect from it is observed.
    pub fn on_done(
        self,
        finalizer: impl FnOnce(&Outcome<E, A>) -> Effect<Never, ()> + 'static,
    ) -> Effect<E, A> {
        Effect::from_node(DynNode::OnDone(
            self.into_node(),
            Box::new(move |o| {
                let typed = unerase_outcome::<E, A>(o);
                let effect = finalizer(&typed).into_node();
                (erase_outcome(typed), effect)
            }),
        ))
    }

    /// Runs `handler` if and only if `self` is interrupted while it runs.
    /// Not invoked on ordinary success or failure.
    pub fn on_interrupted(self, handler: impl FnOnce() -> Effect<Never, ()> + 'static) -> Effect<E, A> {
        Effect::from_node(DynNode::OnInterrupted(self.into_node(), Box::new(move || handler().into_node())))
    }

    /// Sugar over [`Effect::chain`] for the common case of transforming the
    /// success value without changing the error type.
    pub fn map<B: 'static>(self, f: impl FnOnce(A) -> B + 'static) -> Effect<E, B> {
        self.chain(move |a| Effect::of(f(a)))
    }

    /// Sugar over [`Effect::chain_error`] for the common case of
    /// transforming a typed failure without touching defects.
    ///
    /// `f` must be [`Copy`] (matching [`Cause::map`]'s own bound): a single
    /// `Cause` can in principle carry more than one `Raise` leaf (e.g. one
    /// built by hand via [`Cause::and`]), and mapping all of them needs more
    /// than one call to `f`, which rules out `FnOnce`.
    pub fn map_error<E2: 'static>(self, f: impl Fn(E) -> E2 + Copy + 'static) -> Effect<E2, A> {
        self.chain_error(move |c| Effect::raised(c.map(f)))
    }
}

impl<A: 'static> Effect<Never, A> {
    /// Widens a never-failing effect's error channel to any `E`. Safe by
    /// construction since [`Never`] is uninhabited: there is no `Raise`
    /// value that could need converting, only defects passing through
    /// unchanged. Useful for sequencing infallible plumbing (acquiring a
    /// lock, forking a fiber) ahead of an effect with a real error type.
    pub fn widen_error<E: 'static>(self) -> Effect<E, A> {
        self.chain_error(|cause: Cause<Never>| -> Effect<E, A> {
            match cause {
                Cause::Raise(never) => match never {},
                Cause::Abort(d) => Effect::raised(Cause::Abort(d)),
                Cause::And(a, b) => Effect::raised(Cause::And(a, b).map(|never: Never| match never {})),
            }
        })
    }
}

fn erase_cause_payload<E: 'static>(e: E) -> AnyBox {
    Box::new(e)
}

/// Produces an independent copy of a settled outcome for a second (or
/// third, ...) waiter joining the same fiber. A defect can't be cloned
/// faithfully since its payload is an opaque `Box<dyn Any>`; later waiters
/// see a fresh [`crate::cause::Defect`] carrying only its rendered message.
pub(crate) fn clone_outcome_for_waiter<E: Clone + 'static, A: Clone + 'static>(o: &DynOutcome) -> DynOutcome {
    match o {
        Outcome::Value(a) => Outcome::Value(Box::new(
            a.downcast_ref::<A>().expect("outcome value type mismatch").clone(),
        ) as AnyBox),
        Outcome::Failed(c) => Outcome::Failed(clone_cause_for_waiter::<E>(c)),
        Outcome::Interrupted => Outcome::Interrupted,
    }
}

fn clone_cause_for_waiter<E: Clone + 'static>(c: &DynCause) -> DynCause {
    match c {
        Cause::Raise(e) => Cause::Raise(Box::new(
            e.downcast_ref::<E>().expect("cause payload type mismatch").clone(),
        ) as AnyBox),
        Cause::Abort(d) => Cause::Abort(crate::cause::Defect::new(d.to_string())),
        Cause::And(a, b) => Cause::And(Box::new(clone_cause_for_waiter::<E>(a)), Box::new(clone_cause_for_waiter::<E>(b))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn of_and_chain_compose_left_to_right() {
        let effect: Effect<String, i32> = Effect::of(1).chain(|a| Effect::of(a + 1));
        let rt = Runtime::new();
        let out = rt.run_to_completion(effect);
        assert_eq!(out, Outcome::Value(2));
    }

    #[test]
    fn failed_short_circuits_chain() {
        let ran = std::rc::Rc::new(std::cell::Cell::new(false));
        let ran2 = ran.clone();
        let effect: Effect<&'static str, i32> =
            Effect::failed("boom").chain(move |a| { ran2.set(true); Effect::of(a) });
        let rt = Runtime::new();
        let out = rt.run_to_completion(effect);
        assert!(!ran.get());
        assert_eq!(out, Outcome::Failed(Cause::Raise("boom")));
    }

    #[test]
    fn chain_error_recovers() {
        let effect: Effect<&'static str, i32> =
            Effect::failed("boom").chain_error(|_| Effect::of(7));
        let rt = Runtime::new();
        let out = rt.run_to_completion(effect);
        assert_eq!(out, Outcome::Value(7));
    }

    #[test]
    fn suspend_catches_panics_as_abort() {
        let effect: Effect<&'static str, i32> = Effect::suspend(|| panic!("nope"));
        let rt = Runtime::new();
        let out = rt.run_to_completion(effect);
        assert!(matches!(out, Outcome::Failed(Cause::Abort(_))));
    }
}
