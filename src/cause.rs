//! Tagged outcome and failure types threaded through the effect interpreter.
//!
//! See [`Cause`] for the failure taxonomy and [`Outcome`] for the terminal
//! result a [`crate::runtime::Runtime`] publishes.

use std::any::Any;
use std::fmt;

/// The uninhabited failure type used for effects that cannot fail in the
/// typed channel (finalizers, interrupt handlers). There is no analogue of
/// `!` on stable Rust, so [`std::convert::Infallible`] stands in for it.
pub type Never = std::convert::Infallible;

/// An opaque, unexpected defect: the payload of a host panic caught at an
/// interpreter boundary (a `suspend` thunk or an `async` register function).
///
/// Defects are not equal to one another and do not implement [`PartialEq`];
/// two defects are only ever the same value if you hold the same `Defect`.
pub struct Defect(Box<dyn Any>);

impl Defect {
    pub fn new<T: Any>(value: T) -> Self {
        Defect(Box::new(value))
    }

    /// Captures the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Defect(payload)
    }

    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self.0.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(boxed) => Err(Defect(boxed)),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<String>() {
            write!(f, "Defect({:?})", s)
        } else if let Some(s) = self.downcast_ref::<&str>() {
            write!(f, "Defect({:?})", s)
        } else {
            f.write_str("Defect(<opaque>)")
        }
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.downcast_ref::<&str>() {
            f.write_str(s)
        } else {
            f.write_str("opaque defect")
        }
    }
}

/// A structured description of why an effect failed.
///
/// `Raise` is a recoverable, typed failure produced by `failed(e)`. `Abort`
/// is an unexpected defect: a host panic caught at a `suspend`/`async`
/// boundary, or an internal programmer-error condition turned into a cause
/// rather than propagated as a panic. `And` composes two causes when a
/// finalizer fails while a cause is already propagating; it is associative
/// and deliberately not commutative (the base cause is always on the left).
#[derive(Debug)]
pub enum Cause<E> {
    Raise(E),
    Abort(Defect),
    And(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// Composes `self` (the in-flight cause) with `other` (a cause raised
    /// while handling `self`, e.g. by a failing finalizer). `self` is kept
    /// on the left so the original failure is never shadowed.
    pub fn and(self, other: Cause<E>) -> Cause<E> {
        Cause::And(Box::new(self), Box::new(other))
    }

    pub fn map<E2>(self, f: impl Fn(E) -> E2 + Copy) -> Cause<E2> {
        match self {
            Cause::Raise(e) => Cause::Raise(f(e)),
            Cause::Abort(d) => Cause::Abort(d),
            Cause::And(a, b) => Cause::And(Box::new(a.map(f)), Box::new(b.map(f))),
        }
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cause::Raise(a), Cause::Raise(b)) => a == b,
            (Cause::And(a1, a2), Cause::And(b1, b2)) => a1 == b1 && a2 == b2,
            // Defects carry no equality; two Aborts are never considered equal.
            _ => false,
        }
    }
}

/// The terminal outcome of a fiber: a value, a failure cause, or
/// interruption. Interruption always wins as a terminal state regardless of
/// what any finalizer produced while unwinding.
#[derive(Debug)]
pub enum Outcome<E, A> {
    Value(A),
    Failed(Cause<E>),
    Interrupted,
}

/// The outcome as observed by onlookers through [`crate::fiber::Fiber::wait`].
pub type FiberOutcome<E, A> = Outcome<E, A>;

impl<E: PartialEq, A: PartialEq> PartialEq for Outcome<E, A> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Outcome::Value(a), Outcome::Value(b)) => a == b,
            (Outcome::Failed(a), Outcome::Failed(b)) => a == b,
            (Outcome::Interrupted, Outcome::Interrupted) => true,
            _ => false,
        }
    }
}

impl<E, A> Outcome<E, A> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Outcome::Interrupted)
    }

    pub fn ok(self) -> Option<A> {
        match self {
            Outcome::Value(a) => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_keeps_base_on_the_left() {
        let c = Cause::Raise("base").and(Cause::Raise("finalizer"));
        match c {
            Cause::And(a, b) => {
                assert_eq!(*a, Cause::Raise("base"));
                assert_eq!(*b, Cause::Raise("finalizer"));
            }
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn aborts_are_never_equal() {
        let a: Cause<i32> = Cause::Abort(Defect::new(1));
        let b: Cause<i32> = Cause::Abort(Defect::new(1));
        assert_ne!(a, b);
    }

    #[test]
    fn outcome_equality_ignores_payload_of_different_variants() {
        let a: Outcome<i32, i32> = Outcome::Value(1);
        let b: Outcome<i32, i32> = Outcome::Interrupted;
        assert_ne!(a, b);
    }
}
