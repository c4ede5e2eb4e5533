//! A binary lock: a [`Semaphore`] of capacity one.

use crate::cause::Never;
use crate::effect::Effect;
use crate::sync::semaphore::Semaphore;

/// Mutual exclusion over a critical section of effect code, expressed as a
/// semaphore with a single permit. There is no guard type to hold and
/// `Deref`: the locked state the mutex protects is whatever `Ref`s or other
/// primitives `with_permit`'s `action` closes over, matching how the rest of
/// this crate's primitives are plain effect-returning handles rather than
/// RAII wrappers.
pub struct Mutex {
    sem: Semaphore,
}

impl Clone for Mutex {
    fn clone(&self) -> Self {
        Mutex { sem: self.sem.clone() }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Mutex { sem: Semaphore::new(1) }
    }

    /// Acquires the lock, queuing behind any fiber already holding it.
    pub fn acquire(&self) -> Effect<Never, ()> {
        self.sem.acquire_n(1)
    }

    /// Releases the lock. A release not matched by a prior acquire leaves
    /// the semaphore over-released, the same programmer-error condition as
    /// calling [`Semaphore::release_n`] directly; `with_permit` is the
    /// intended entry point and never triggers this.
    pub fn release(&self) -> Effect<Never, ()> {
        self.sem.release_n(1)
    }

    pub fn try_acquire(&self) -> Effect<Never, bool> {
        self.sem.try_acquire_n(1)
    }

    /// Runs `action` while holding the lock, releasing it on any exit.
    pub fn with_permit<E: 'static, A: 'static>(&self, action: Effect<E, A>) -> Effect<E, A> {
        self.sem.with_permit(action)
    }
}
