//! Control channel: out-of-band commands from the hosting application.

use serde_json::Value;
use std::str::FromStr;

use crate::error::RelayError;

/// A directive sent by the hosting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate the installed generation immediately
  SkipWaiting,
  /// Drop the current generation's contents
  ClearCache,
}

impl FromStr for ControlMessage {
  type Err = RelayError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "skipWaiting" | "SKIP_WAITING" => Ok(Self::SkipWaiting),
      "clearCache" | "CLEAR_CACHE" => Ok(Self::ClearCache),
      other => Err(RelayError::UnrecognizedControlMessage(other.to_string())),
    }
  }
}

impl ControlMessage {
  /// Read a message sent either as a bare string or as `{"type": "..."}`.
  pub fn from_value(value: &Value) -> Result<Self, RelayError> {
    let directive = match value {
      Value::String(s) => Some(s.as_str()),
      Value::Object(map) => map.get("type").and_then(Value::as_str),
      _ => None,
    };

    match directive {
      Some(directive) => directive.parse(),
      None => Err(RelayError::UnrecognizedControlMessage(value.to_string())),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::SkipWaiting => "skipWaiting",
      Self::ClearCache => "clearCache",
    }
  }
}
