//! Network access for the relay.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use reqwest::StatusCode;
use tracing::{debug, trace};

use crate::error::{RelayError, Result};
use crate::request::InterceptedRequest;
use crate::store::StoredEntry;

/// A fully read network response.
///
/// The body is read from the wire exactly once; after that it is shared, immutable `Bytes`, so a
/// snapshot for the store and the copy handed to the caller never compete for it.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl NetworkResponse {
  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    self.status.is_success()
  }

  /// Whether the response may be written to the store: 2xx, but never a partial body.
  pub fn is_storable(&self) -> bool {
    self.is_ok() && self.status != StatusCode::PARTIAL_CONTENT
  }

  /// Capture the response for the content store.
  pub fn snapshot(&self) -> StoredEntry {
    StoredEntry::capture(self.status.as_u16(), &self.headers, self.body.clone())
  }
}

/// Something that can perform a fetch.
///
/// Any HTTP status is a successful fetch; only a rejected request is an error.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &InterceptedRequest) -> Result<NetworkResponse>;
}

/// Headers that describe a single hop and must not be forwarded.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
  name == CONNECTION
    || name == TRANSFER_ENCODING
    || name == HOST
    || name == CONTENT_LENGTH
    || matches!(
      name.as_str(),
      "keep-alive" | "proxy-connection" | "te" | "trailer" | "upgrade"
    )
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("fatslim-relay/", env!("CARGO_PKG_VERSION")))
      // Redirects go back to the client untouched
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| RelayError::NetworkFailure(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &InterceptedRequest) -> Result<NetworkResponse> {
    debug!(method = %request.method, url = %request.url, "Fetching from network");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in request.headers.iter() {
      if !is_hop_by_hop(name) {
        builder = builder.header(name, value);
      }
    }

    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| RelayError::NetworkFailure(format!("Failed to fetch {}: {}", request.url, e)))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|e| {
      RelayError::NetworkFailure(format!("Failed to read body of {}: {}", request.url, e))
    })?;

    trace!(url = %request.url, status = %status, bytes = body.len(), "Network response");

    Ok(NetworkResponse {
      status,
      headers,
      body,
    })
  }
}
