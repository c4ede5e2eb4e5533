//! Crate-level ambient error type.
//!
//! [`Cause<E>`](crate::cause::Cause) is the effect algebra's own generic
//! failure channel, threaded through `chain_error`/`on_done` and carried by
//! every [`crate::runtime::Runtime`]. [`RuntimeError`] is unrelated: it is
//! the crate's "everything else" error for the ambient host-integration
//! layer (the scheduler, the standalone top-level driver), surfaced through
//! an ordinary `Result` at the handful of public boundaries where a panic
//! would be an unfriendly way to report programmer misuse.

use thiserror::Error;

/// A specialized [`Result`] type for the ambient (non-`Cause`) failure modes
/// of this crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Failures from outside the effect algebra itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// A top-level [`crate::runtime::Runtime`] suspended on an `async`
    /// boundary but the scheduler has no further queued work or pending
    /// timer that could ever resume it — almost always a leaked `async`
    /// registration that never calls `resume`/`fail`.
    #[error("effect suspended with no scheduled work left to resume it")]
    Starved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starved_error_message() {
        assert_eq!(RuntimeError::Starved.to_string(), "effect suspended with no scheduled work left to resume it");
    }
}
