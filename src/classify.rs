//! Request classification.

use reqwest::Method;

use crate::request::InterceptedRequest;

/// The kind of a request, which decides its fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Listed in the precache set; only used while populating a generation
  PrecacheAsset,
  /// Under the reserved API prefix
  ApiCall,
  /// Full-page navigation
  Navigation,
  /// Any other GET
  GenericAsset,
}

/// How a request class is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkOnly,
  NetworkFirst,
  StaleWhileRevalidate,
}

impl RequestClass {
  pub fn strategy(&self) -> Strategy {
    match self {
      Self::ApiCall => Strategy::NetworkOnly,
      Self::Navigation => Strategy::NetworkFirst,
      Self::GenericAsset | Self::PrecacheAsset => Strategy::StaleWhileRevalidate,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::PrecacheAsset => "precache-asset",
      Self::ApiCall => "api-call",
      Self::Navigation => "navigation",
      Self::GenericAsset => "generic-asset",
    }
  }
}

/// Classify a request. `None` means it is not intercepted at all.
///
/// Precedence: non-GET, API prefix, navigation, everything else.
pub fn classify(request: &InterceptedRequest, api_prefix: &str) -> Option<RequestClass> {
  if request.method != Method::GET {
    return None;
  }

  if request.url.path().starts_with(api_prefix) {
    return Some(RequestClass::ApiCall);
  }

  if request.navigate {
    return Some(RequestClass::Navigation);
  }

  Some(RequestClass::GenericAsset)
}
