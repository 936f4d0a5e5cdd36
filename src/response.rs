//! Responses handed back across the interception boundary.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::network::NetworkResponse;
use crate::store::StoredEntry;

/// Body returned for API calls that could not reach the network.
pub const OFFLINE_API_BODY: &str = r#"{"error":"Network error","offline":true}"#;

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from the content store
  Cache,
  /// Synthesized because the network was unreachable
  Offline,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
    }
  }
}

/// A response plus metadata about its source.
#[derive(Debug, Clone)]
pub struct RelayResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
  pub source: ResponseSource,
  /// When the entry was stored (if from cache)
  pub stored_at: Option<DateTime<Utc>>,
}

impl RelayResponse {
  pub fn from_network(response: NetworkResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: response.body,
      source: ResponseSource::Network,
      stored_at: None,
    }
  }

  pub fn from_cache(entry: StoredEntry) -> Self {
    Self {
      status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
      headers: entry.header_map(),
      body: entry.body,
      source: ResponseSource::Cache,
      stored_at: Some(entry.stored_at),
    }
  }

  /// The 503 JSON error served for API calls while offline.
  pub fn offline_api_error() -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Self {
      status: StatusCode::SERVICE_UNAVAILABLE,
      headers,
      body: Bytes::from_static(OFFLINE_API_BODY.as_bytes()),
      source: ResponseSource::Offline,
      stored_at: None,
    }
  }
}
