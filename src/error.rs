//! Error taxonomy for the relay core.
//!
//! Every failure the relay can observe maps onto one of these variants. Call sites decide
//! whether a variant is surfaced, converted into a fallback response, or only logged.

use thiserror::Error;

/// Errors raised by the relay core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
  /// The content store could not be opened, read or written.
  #[error("Store unavailable: {0}")]
  StoreUnavailable(String),

  /// A fetch was rejected before a response arrived.
  #[error("Network error: {0}")]
  NetworkFailure(String),

  /// A push payload was not a JSON object. Defaults are substituted.
  #[error("Malformed push payload: {0}")]
  MalformedPushPayload(String),

  /// A control message had no known directive. It is ignored.
  #[error("Unrecognized control message: {0}")]
  UnrecognizedControlMessage(String),

  /// The intercepted request could not be turned into an absolute URL.
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Build a `map_err` adapter that wraps a backend error as `StoreUnavailable`.
pub(crate) fn store_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RelayError {
  move |e| RelayError::StoreUnavailable(format!("{}: {}", context, e))
}
