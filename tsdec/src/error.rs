//! Control-surface error types.

use thiserror::Error;

/// Errors returned by the descrambler control operations.
///
/// Input processing itself never fails: malformed packets are dropped and
/// logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Flow definition does not match the accepted input prefix.
    #[error("invalid flow definition: {0:?}")]
    InvalidFlow(String),

    /// Control word rejected.
    #[error("invalid control word: {0}")]
    InvalidKey(String),

    /// The cipher backend or its driver is unavailable.
    #[error("backend unavailable")]
    BackendUnavailable,
}
