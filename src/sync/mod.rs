//! Synchronization primitives built on top of the effect algebra itself:
//! [`Ref`] (a mutable cell), [`Deferred`] (an async cell filled at most
//! once), [`Semaphore`] (a counting, FIFO-fair gate), and [`Mutex`] (a
//! semaphore of capacity one). None of these need a lock — the scheduler is
//! single-threaded, so mutation only ever happens during the synchronous
//! portion of one fiber's step.

pub mod deferred;
pub mod mutex;
pub mod ref_cell;
pub mod semaphore;

pub use deferred::Deferred;
pub use mutex::Mutex;
pub use ref_cell::Ref;
pub use semaphore::Semaphore;
