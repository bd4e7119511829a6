//! Engine status and error types.
//!
//! Fatal conditions are `FlowError`; drain-style operations that report
//! partial progress use `DrainState` instead of overloading the error path.

use thiserror::Error;

/// Errors surfaced by the engine core.
#[derive(Debug, Error)]
pub enum FlowError {
  /// The declared graph is structurally ill-formed. Raised by the static
  /// checker (and by the build pipeline for unresolvable descriptions)
  /// before any execution starts.
  #[error("bad graph configuration: {0}")]
  BadConfig(String),

  /// Buffer lineage is malformed at run time, e.g. a buffer arrived for a
  /// sub-stream that already saw its end-flag.
  #[error("invalid state: {0}")]
  InvalidState(String),

  /// The session was aborted while the operation was in flight.
  #[error("session {0} aborted")]
  Aborted(String),
}

/// Progress report for drain-style calls such as
/// [`SessionUnmatchCache::pop_cache`](crate::virtual_node::SessionUnmatchCache::pop_cache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
  /// A slice was produced; call again.
  Continue,
  /// Nothing left to drain.
  NoData,
}

/// Error attached to a single buffer by a processing unit.
///
/// A buffer with an error still flows downstream; delivery reduces the
/// errors of one matched group to a single `last_error` for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{unit}: {message}")]
pub struct BufferError {
  unit: String,
  message: String,
}

impl BufferError {
  pub fn new(unit: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      unit: unit.into(),
      message: message.into(),
    }
  }

  pub fn unit(&self) -> &str {
    &self.unit
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}
