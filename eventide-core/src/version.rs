//! Stream versions, global sequence numbers and optimistic concurrency.
//!
//! Two orderings exist in the engine:
//!
//! - [`Version`] orders the events of a single stream. It starts at 1 and
//!   grows by exactly one per event; a stream at version 0 does not exist yet.
//!   Versions are the unit of optimistic concurrency.
//! - [`SequenceNumber`] orders every event in a store. It is assigned at
//!   append time, is never reused, and drives catch-up replay across streams.
//!
//! # Example
//!
//! ```
//! use eventide_core::version::{ConflictError, ExpectedVersion};
//!
//! assert!(ExpectedVersion::Any.check(7).is_ok());
//! assert_eq!(
//!     ExpectedVersion::Exact(2).check(3),
//!     Err(ConflictError { expected: 2, actual: 3 })
//! );
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of an event inside its stream, starting at 1.
pub type Version = u64;

/// Store-wide position of an event, starting at 1.
pub type SequenceNumber = u64;

/// Version check requested by an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Append regardless of the stream's current version.
    #[default]
    Any,
    /// Append only if the stream is currently at exactly this version.
    ///
    /// `Exact(0)` means the stream must not exist yet.
    Exact(Version),
}

impl ExpectedVersion {
    /// Expect the stream to be empty.
    #[must_use]
    pub const fn new_stream() -> Self {
        Self::Exact(0)
    }

    /// Compare against the stream's current version.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] when an exact expectation does not match.
    pub const fn check(self, actual: Version) -> Result<(), ConflictError> {
        match self {
            Self::Exact(expected) if expected != actual => Err(ConflictError { expected, actual }),
            _ => Ok(()),
        }
    }
}

impl From<Version> for ExpectedVersion {
    fn from(version: Version) -> Self {
        Self::Exact(version)
    }
}

/// An append's expected version no longer matches the stream.
///
/// Never retried by the engine: callers reload the current state and decide
/// whether to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", format_conflict(*.expected, *.actual))]
pub struct ConflictError {
    /// The version the writer expected the stream to be at.
    pub expected: Version,
    /// The version the stream was actually at.
    pub actual: Version,
}

/// Build a human-readable message for a [`ConflictError`], including an
/// actionable hint for the caller.
fn format_conflict(expected: Version, actual: Version) -> String {
    if expected == 0 {
        format!(
            "concurrency conflict: expected new stream, found version {actual} (hint: another \
             process created this stream; reload and retry)"
        )
    } else {
        format!(
            "concurrency conflict: expected version {expected}, found {actual} (hint: stream \
             was modified; reload and retry)"
        )
    }
}
