//! A mutable cell read and written through effects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cause::Never;
use crate::effect::Effect;

/// A mutable cell holding an `A`, read and written only from inside effect
/// steps. Because the scheduler is single-threaded, there is never any
/// interleaving within a single step — no atomics, no locks, just a
/// `RefCell`.
pub struct Ref<A> {
    cell: Rc<RefCell<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Ref { cell: Rc::clone(&self.cell) }
    }
}

impl<A: 'static> Ref<A> {
    pub fn new(initial: A) -> Self {
        Ref { cell: Rc::new(RefCell::new(initial)) }
    }

    /// Reads the current value.
    pub fn get(&self) -> Effect<Never, A>
    where
        A: Clone,
    {
        let cell = Rc::clone(&self.cell);
        Effect::suspend(move || cell.borrow().clone())
    }

    /// Overwrites the current value.
    pub fn set(&self, value: A) -> Effect<Never, ()> {
        let cell = Rc::clone(&self.cell);
        Effect::suspend(move || *cell.borrow_mut() = value)
    }

    /// Mutates the held value in place and returns a derived result.
    ///
    /// The source algebra describes this as `f: A -> [A, B]`, replacing the
    /// old value with a newly constructed one; taking `f: &mut A -> B`
    /// instead is the idiomatic Rust equivalent (a `RefCell` borrow already
    /// gives exclusive, in-place access) and avoids requiring callers to
    /// move a placeholder value through the closure.
    pub fn modify<B: 'static>(&self, f: impl FnOnce(&mut A) -> B + 'static) -> Effect<Never, B> {
        let cell = Rc::clone(&self.cell);
        Effect::suspend(move || f(&mut cell.borrow_mut()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Outcome;
    use crate::runtime::Runtime;

    #[test]
    fn get_set_round_trip() {
        let r = Ref::new(1);
        let rt = Runtime::new();
        let out = rt.run_to_completion(r.set(41).chain(move |_| r.get()));
        assert_eq!(out, Outcome::Value(41));
    }

    #[test]
    fn modify_mutates_and_returns_derived_value() {
        let r = Ref::new(10);
        let rt = Runtime::new();
        let out = rt.run_to_completion(r.modify(|v| {
            *v += 5;
            *v * 2
        }));
        assert_eq!(out, Outcome::Value(30));
        assert_eq!(rt.run_to_completion(r.get()), Outcome::Value(15));
    }
}
