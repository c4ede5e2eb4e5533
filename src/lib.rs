//! A cooperatively scheduled effect interpreter.
//!
//! A computation is first built as an inert [`effect::Effect`] value — a
//! small tree of combinators like `chain`, `on_done`, and `async` — and only
//! does anything once handed to a [`runtime::Runtime`] or [`fiber::fork`].
//! Running it drives a single-threaded, cooperative [`fiber`] scheduler:
//! fibers suspend at `async` boundaries, resume when something calls back
//! into [`runtime::context_switch::ContextSwitch`], and can be interrupted
//! or joined through their [`fiber::Fiber`] handle. [`sync`] layers the
//! common concurrency primitives — a mutable cell, a write-once cell, a
//! counting semaphore, and a mutex — on top of the same algebra, with no
//! locks of their own since only one fiber's synchronous code ever runs at
//! a time.

pub mod cause;
pub mod effect;
pub mod error;
pub mod fiber;
pub mod one_shot;
pub mod runtime;
pub mod scheduler;
pub mod sync;

pub use cause::{Cause, Defect, FiberOutcome, Never, Outcome};
pub use effect::Effect;
pub use error::{Result, RuntimeError};
pub use fiber::{fork, Fiber};
pub use runtime::Runtime;
