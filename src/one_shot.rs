//! A write-once cell with multi-listener notification.
//!
//! [`OneShot`] is the leaf primitive everything else in this crate is built
//! from: the [`crate::runtime::RuntimeInner`] publishes a fiber's terminal
//! outcome into one, and [`crate::sync::deferred::Deferred`] is little more
//! than a typed `OneShot` plus the `async` registration glue.

use std::cell::{Cell, Ref, RefCell};

/// A token identifying a pending [`OneShot::listen`] registration, returned
/// so it can later be passed to [`OneShot::unlisten`].
///
/// Closures aren't comparable by identity in Rust the way the dynamically
/// typed original's functions were, so registrations are tracked by a small
/// counter instead.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ListenToken(Option<u64>);

struct Listener<T> {
    token: u64,
    callback: Box<dyn FnOnce(&T)>,
}

/// A slot that holds at most one `T`, settled exactly once.
///
/// Listeners registered before the cell is set are invoked, in registration
/// order, at the moment [`OneShot::set`] fills it. A listener registered
/// after the cell is already full is invoked immediately and synchronously,
/// inline with the `listen` call.
pub struct OneShot<T> {
    value: RefCell<Option<T>>,
    listeners: RefCell<Vec<Listener<T>>>,
    next_token: Cell<u64>,
}

impl<T> Default for OneShot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OneShot<T> {
    pub fn new() -> Self {
        OneShot {
            value: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            next_token: Cell::new(0),
        }
    }

    /// Fills the cell and fires every pending listener, in registration
    /// order. Calling this a second time is a programmer error: a `OneShot`
    /// models a value that is determined exactly once, so a second `set`
    /// would mean two different answers to the same question.
    pub fn set(&self, value: T) {
        {
            let mut slot = self.value.borrow_mut();
            if slot.is_some() {
                log::error!("OneShot::set called on an already-settled cell");
                panic!("OneShot::set called twice");
            }
            *slot = Some(value);
        }
        let pending = std::mem::take(&mut *self.listeners.borrow_mut());
        let slot = self.value.borrow();
        let value_ref = slot.as_ref().expect("just stored above");
        for listener in pending {
            (listener.callback)(value_ref);
        }
    }

    pub fn is_set(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Reads the stored value by reference, if the cell has settled.
    pub fn get(&self) -> Option<Ref<'_, T>> {
        let slot = self.value.borrow();
        if slot.is_some() {
            Some(Ref::map(slot, |v| v.as_ref().unwrap()))
        } else {
            None
        }
    }

    /// Reads the stored value, panicking if the cell has not settled yet.
    /// For call sites that have already established `is_set()` some other
    /// way and want to skip the `Option` dance.
    pub fn unsafe_get(&self) -> Ref<'_, T> {
        Ref::map(self.value.borrow(), |v| {
            v.as_ref().expect("OneShot::unsafe_get called before set")
        })
    }

    /// Consumes the stored value, leaving the cell empty again. Only safe
    /// for an exclusive owner that knows no one else still holds a reference
    /// to this cell and intends to read it once — [`crate::runtime::Runtime::run_to_completion`]
    /// is the only caller, since it owns its `RuntimeInner` outright and
    /// never hands out a [`crate::fiber::Fiber`] to it.
    pub(crate) fn take(&self) -> Option<T> {
        self.value.borrow_mut().take()
    }

    /// Registers `f` to run once the cell settles; if it already has, `f`
    /// runs synchronously before this call returns. Returns a token to pass
    /// to [`OneShot::unlisten`] to cancel a still-pending registration (a
    /// no-op once the listener has already fired).
    pub fn listen(&self, f: impl FnOnce(&T) + 'static) -> ListenToken {
        if let Some(value) = &*self.value.borrow() {
            f(value);
            return ListenToken(None);
        }
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.listeners.borrow_mut().push(Listener { token, callback: Box::new(f) });
        ListenToken(Some(token))
    }

    /// Removes a pending registration. A no-op if the listener already fired
    /// (its token carries no id) or was already removed.
    pub fn unlisten(&self, token: ListenToken) {
        if let Some(token) = token.0 {
            self.listeners.borrow_mut().retain(|l| l.token != token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn listen_before_set_fires_once_in_order() {
        let cell = OneShot::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = Rc::clone(&seen);
            cell.listen(move |v: &i32| seen.borrow_mut().push((i, *v)));
        }
        cell.set(42);
        assert_eq!(*seen.borrow(), vec![(0, 42), (1, 42), (2, 42)]);
    }

    #[test]
    fn listen_after_set_fires_synchronously() {
        let cell = OneShot::new();
        cell.set(7);
        let seen = Rc::new(Cell::new(None));
        let seen2 = Rc::clone(&seen);
        cell.listen(move |v: &i32| seen2.set(Some(*v)));
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn unlisten_cancels_a_pending_registration() {
        let cell = OneShot::new();
        let fired = Rc::new(Cell::new(false));
        let fired2 = Rc::clone(&fired);
        let token = cell.listen(move |_: &i32| fired2.set(true));
        cell.unlisten(token);
        cell.set(1);
        assert!(!fired.get());
    }

    #[test]
    #[should_panic(expected = "OneShot::set called twice")]
    fn setting_twice_panics() {
        let cell = OneShot::new();
        cell.set(1);
        cell.set(2);
    }
}
