//! Core traits and types for the content store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::error::Result;

/// Identity of a stored request: method plus absolute URL.
///
/// Fragments are dropped since they never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestIdentity {
  method: String,
  url: String,
}

impl RequestIdentity {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_ascii_uppercase(),
      url: url.into(),
    }
  }

  /// Identity of a GET request for `url`.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// Rebuild an identity from its stored parts.
  pub fn from_parts(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      method: method.into(),
      url: url.into(),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Identity of a GET for the root path `/` on the same origin.
  pub fn root(&self) -> Option<Self> {
    let url = Url::parse(&self.url).ok()?;
    let root = url.join("/").ok()?;
    Some(Self::get(&root))
  }

  /// Stable, fixed-length key for storage backends.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Immutable capture of a response taken at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  pub status: u16,
  /// Header names with their raw value bytes
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Bytes,
  pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
  /// Capture a response. The body is shared, not copied.
  pub fn capture(status: u16, headers: &HeaderMap, body: Bytes) -> Self {
    let headers = headers
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();

    Self {
      status,
      headers,
      body,
      stored_at: Utc::now(),
    }
  }

  /// Rebuild a header map, skipping any header that no longer parses.
  pub fn header_map(&self) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in &self.headers {
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_bytes(value),
      ) {
        map.append(name, value);
      }
    }
    map
  }
}

/// Trait for content store backends.
///
/// A backend holds any number of named generations, each mapping request identities to stored
/// entries. Reads against a generation that does not exist are misses.
pub trait ContentStore: Send + Sync {
  /// Create a generation if it does not exist yet.
  fn create(&self, generation: &str) -> Result<()>;

  /// Look up an entry in a generation.
  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<StoredEntry>>;

  /// Store an entry, replacing any entry with the same identity.
  fn put(&self, generation: &str, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()>;

  /// Enumerate the identities stored in a generation.
  fn identities(&self, generation: &str) -> Result<Vec<RequestIdentity>>;

  /// Delete a generation and everything in it. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Names of all existing generations, oldest first.
  fn list_names(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_drops_fragment() {
    let url = Url::parse("https://fatslim.test/recipes#top").unwrap();
    let identity = RequestIdentity::get(&url);
    assert_eq!(identity.url(), "https://fatslim.test/recipes");
    assert_eq!(identity.to_string(), "GET https://fatslim.test/recipes");
  }

  #[test]
  fn test_identity_root() {
    let url = Url::parse("https://fatslim.test/dashboard/week?day=2").unwrap();
    let root = RequestIdentity::get(&url).root().unwrap();
    assert_eq!(root.url(), "https://fatslim.test/");
    assert_eq!(root.method(), "GET");
  }

  #[test]
  fn test_cache_hash_depends_on_method() {
    let url = Url::parse("https://fatslim.test/api/meals").unwrap();
    let get = RequestIdentity::get(&url);
    let post = RequestIdentity::new(&Method::POST, &url);
    assert_eq!(get.cache_hash().len(), 64);
    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_eq!(get.cache_hash(), RequestIdentity::get(&url).cache_hash());
  }

  #[test]
  fn test_entry_header_map() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("text/css"));
    headers.append("set-cookie", HeaderValue::from_static("a=1"));
    headers.append("set-cookie", HeaderValue::from_static("b=2"));

    let entry = StoredEntry::capture(200, &headers, Bytes::from_static(b"body{}"));
    let rebuilt = entry.header_map();

    assert_eq!(rebuilt.get("content-type").unwrap(), "text/css");
    assert_eq!(rebuilt.get_all("set-cookie").iter().count(), 2);
  }

  #[test]
  fn test_entry_keeps_opaque_header_bytes() {
    let raw: &[u8] = b"attachment; filename=\"r\xe9gime.pdf\"";
    let mut headers = HeaderMap::new();
    headers.insert("content-disposition", HeaderValue::from_bytes(raw).unwrap());

    let entry = StoredEntry::capture(200, &headers, Bytes::new());
    assert_eq!(entry.headers[0].1, raw.to_vec());
    assert_eq!(
      entry.header_map().get("content-disposition").unwrap().as_bytes(),
      raw
    );
  }
}
