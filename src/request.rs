//! Requests as seen at the interception boundary.

use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Method;
use url::Url;

use crate::store::RequestIdentity;

/// A request issued by the hosted application.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
  pub method: Method,
  pub url: Url,
  /// Whether the request is a full-page navigation
  pub navigate: bool,
  pub headers: HeaderMap,
  pub body: Option<Bytes>,
}

impl InterceptedRequest {
  /// A plain GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      navigate: false,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  /// A GET page navigation.
  pub fn navigation(url: Url) -> Self {
    Self {
      navigate: true,
      ..Self::get(url)
    }
  }

  /// Build a request from raw HTTP parts, deriving the navigation flag from the headers.
  pub fn from_parts(method: Method, url: Url, headers: HeaderMap, body: Option<Bytes>) -> Self {
    let navigate = is_navigation(&headers);
    Self {
      method,
      url,
      navigate,
      headers,
      body,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn identity(&self) -> RequestIdentity {
    RequestIdentity::new(&self.method, &self.url)
  }
}

/// `Sec-Fetch-Mode: navigate` wins; without it, fall back to an Accept header asking for HTML.
fn is_navigation(headers: &HeaderMap) -> bool {
  match headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
    Some(mode) => mode.trim().eq_ignore_ascii_case("navigate"),
    None => headers
      .get(ACCEPT)
      .and_then(|v| v.to_str().ok())
      .map(|accept| {
        accept
          .split(',')
          .any(|part| part.trim().starts_with("text/html"))
      })
      .unwrap_or(false),
  }
}
