//! Fetch strategy engine: decides, per request class, how the network and the content store
//! combine to produce a response.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classify::{RequestClass, Strategy};
use crate::error::Result;
use crate::network::Network;
use crate::request::InterceptedRequest;
use crate::response::RelayResponse;
use crate::store::{CacheStorage, RequestIdentity, StoredEntry};
use crate::tasks::BackgroundTasks;

/// Executes fetch strategies against the current generation.
///
/// This sits between the interception boundary and the network, providing transparent caching
/// with offline support.
#[derive(Clone)]
pub struct StrategyEngine {
  caches: CacheStorage,
  network: Arc<dyn Network>,
  /// Generation all writes go to
  generation: String,
  background: BackgroundTasks,
}

impl StrategyEngine {
  pub fn new(
    caches: CacheStorage,
    network: Arc<dyn Network>,
    generation: impl Into<String>,
    background: BackgroundTasks,
  ) -> Self {
    Self {
      caches,
      network,
      generation: generation.into(),
      background,
    }
  }

  /// Serve a classified request.
  pub async fn respond(
    &self,
    request: &InterceptedRequest,
    class: RequestClass,
  ) -> Result<RelayResponse> {
    debug!(url = %request.url, class = class.as_str(), "Applying fetch strategy");
    match class.strategy() {
      Strategy::NetworkOnly => Ok(self.network_only(request).await),
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    }
  }

  /// Hand an unclassified request straight to the network.
  pub async fn pass_through(&self, request: &InterceptedRequest) -> Result<RelayResponse> {
    let response = self.network.fetch(request).await?;
    Ok(RelayResponse::from_network(response))
  }

  /// Network only; on failure, a synthesized 503 JSON error.
  async fn network_only(&self, request: &InterceptedRequest) -> RelayResponse {
    match self.network.fetch(request).await {
      Ok(response) => RelayResponse::from_network(response),
      Err(e) => {
        warn!(url = %request.url, error = %e, "API call failed, answering offline");
        RelayResponse::offline_api_error()
      }
    }
  }

  /// Network first.
  ///
  /// 1. Fetch from network; store a copy in the background if OK
  /// 2. On failure, serve the stored entry for this request
  /// 3. Failing that, serve the stored entry for `/`
  /// 4. Otherwise the network error propagates
  async fn network_first(&self, request: &InterceptedRequest) -> Result<RelayResponse> {
    let identity = request.identity();

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_storable() {
          self.store_in_background(identity, response.snapshot());
        }
        Ok(RelayResponse::from_network(response))
      }
      Err(e) => {
        if let Some(entry) = self.lookup(&identity) {
          info!(url = %request.url, "Offline, serving stored page");
          return Ok(RelayResponse::from_cache(entry));
        }

        if let Some(entry) = identity.root().and_then(|root| self.lookup(&root)) {
          info!(url = %request.url, "Offline, serving stored root document");
          return Ok(RelayResponse::from_cache(entry));
        }

        warn!(url = %request.url, error = %e, "Offline with no stored document");
        Err(e)
      }
    }
  }

  /// Cache first with background refresh.
  ///
  /// A hit is returned immediately while a refresh runs detached. A miss is fetched inline and
  /// stored before returning.
  async fn stale_while_revalidate(&self, request: &InterceptedRequest) -> Result<RelayResponse> {
    let identity = request.identity();

    if let Some(entry) = self.lookup(&identity) {
      self.revalidate_in_background(request.clone());
      return Ok(RelayResponse::from_cache(entry));
    }

    let response = self.network.fetch(request).await?;
    if response.is_storable() {
      let entry = response.snapshot();
      if let Err(e) = self.store(&identity, &entry) {
        warn!(url = %request.url, error = %e, "Failed to store asset");
      }
    }
    Ok(RelayResponse::from_network(response))
  }

  /// Look an identity up; store failures count as a miss.
  fn lookup(&self, identity: &RequestIdentity) -> Option<StoredEntry> {
    match self.caches.match_request(&self.generation, identity) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(identity = %identity, error = %e, "Store lookup failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    self.caches.open(&self.generation)?.put(identity, entry)
  }

  fn store_in_background(&self, identity: RequestIdentity, entry: StoredEntry) {
    let caches = self.caches.clone();
    let generation = self.generation.clone();
    self.background.spawn("store", async move {
      caches.open(&generation)?.put(&identity, &entry)
    });
  }

  fn revalidate_in_background(&self, request: InterceptedRequest) {
    let engine = self.clone();
    self.background.spawn("revalidate", async move {
      let response = engine.network.fetch(&request).await?;
      if response.is_storable() {
        engine.store(&request.identity(), &response.snapshot())?;
        debug!(url = %request.url, "Refreshed stored asset");
      }
      Ok(())
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RelayError;
  use crate::response::{ResponseSource, OFFLINE_API_BODY};
  use crate::store::MemoryStore;
  use crate::testing::{url, BrokenStore, MockNetwork};
  use bytes::Bytes;
  use reqwest::header::HeaderMap;
  use reqwest::StatusCode;
  use std::time::Duration;

  struct Fixture {
    engine: StrategyEngine,
    caches: CacheStorage,
    network: Arc<MockNetwork>,
    background: BackgroundTasks,
  }

  fn fixture(network: MockNetwork) -> Fixture {
    let caches = CacheStorage::new(Arc::new(MemoryStore::new()));
    let network = Arc::new(network);
    let background = BackgroundTasks::new();
    let engine = StrategyEngine::new(
      caches.clone(),
      network.clone(),
      "v2",
      background.clone(),
    );
    Fixture {
      engine,
      caches,
      network,
      background,
    }
  }

  fn seed(caches: &CacheStorage, path: &str, body: &'static str) {
    let entry = StoredEntry::capture(200, &HeaderMap::new(), Bytes::from_static(body.as_bytes()));
    caches
      .open("v2")
      .unwrap()
      .put(&RequestIdentity::get(&url(path)), &entry)
      .unwrap();
  }

  fn stored_body(caches: &CacheStorage, path: &str) -> Option<Bytes> {
    caches
      .open("v2")
      .unwrap()
      .get(&RequestIdentity::get(&url(path)))
      .unwrap()
      .map(|entry| entry.body)
  }

  #[tokio::test]
  async fn test_api_call_returns_network_response_uncached() {
    let f = fixture(MockNetwork::new().route("/api/meals", 500, "boom"));
    let request = InterceptedRequest::get(url("/api/meals"));

    let response = f.engine.respond(&request, RequestClass::ApiCall).await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.source, ResponseSource::Network);

    f.background.drain().await;
    assert!(stored_body(&f.caches, "/api/meals").is_none());
  }

  #[tokio::test]
  async fn test_api_call_offline_is_503_json() {
    let f = fixture(MockNetwork::new().route("/api/meals", 200, "[]"));
    f.network.set_offline(true);
    let request = InterceptedRequest::get(url("/api/meals"));

    let response = f.engine.respond(&request, RequestClass::ApiCall).await.unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body, Bytes::from_static(OFFLINE_API_BODY.as_bytes()));
    assert_eq!(response.source, ResponseSource::Offline);
  }

  #[tokio::test]
  async fn test_navigation_online_stores_copy() {
    let f = fixture(MockNetwork::new().route("/dashboard", 200, "<h1>dash</h1>"));
    let request = InterceptedRequest::navigation(url("/dashboard"));

    let response = f
      .engine
      .respond(&request, RequestClass::Navigation)
      .await
      .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"<h1>dash</h1>"));
    assert_eq!(response.source, ResponseSource::Network);

    f.background.drain().await;
    assert_eq!(
      stored_body(&f.caches, "/dashboard"),
      Some(Bytes::from_static(b"<h1>dash</h1>"))
    );
  }

  #[tokio::test]
  async fn test_navigation_non_ok_is_returned_not_stored() {
    let f = fixture(MockNetwork::new());
    let request = InterceptedRequest::navigation(url("/nowhere"));

    let response = f
      .engine
      .respond(&request, RequestClass::Navigation)
      .await
      .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    f.background.drain().await;
    assert!(stored_body(&f.caches, "/nowhere").is_none());
  }

  #[tokio::test]
  async fn test_navigation_offline_prefers_exact_entry() {
    let f = fixture(MockNetwork::new());
    seed(&f.caches, "/dashboard", "stored dashboard");
    seed(&f.caches, "/", "stored root");
    f.network.set_offline(true);

    let request = InterceptedRequest::navigation(url("/dashboard"));
    let response = f
      .engine
      .respond(&request, RequestClass::Navigation)
      .await
      .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"stored dashboard"));
    assert_eq!(response.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_navigation_offline_falls_back_to_root() {
    let f = fixture(MockNetwork::new());
    seed(&f.caches, "/", "stored root");
    f.network.set_offline(true);

    let request = InterceptedRequest::navigation(url("/dashboard"));
    let response = f
      .engine
      .respond(&request, RequestClass::Navigation)
      .await
      .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"stored root"));
  }

  #[tokio::test]
  async fn test_navigation_offline_without_fallback_propagates() {
    let f = fixture(MockNetwork::new());
    f.network.set_offline(true);

    let request = InterceptedRequest::navigation(url("/dashboard"));
    let err = f
      .engine
      .respond(&request, RequestClass::Navigation)
      .await
      .unwrap_err();
    assert!(matches!(err, RelayError::NetworkFailure(_)));
  }

  #[tokio::test]
  async fn test_asset_hit_returns_without_waiting_for_network() {
    let f = fixture(MockNetwork::new().route("/static/js/main.js", 200, "fresh"));
    seed(&f.caches, "/static/js/main.js", "stale");
    f.network.hold();

    let request = InterceptedRequest::get(url("/static/js/main.js"));
    let response = tokio::time::timeout(
      Duration::from_secs(1),
      f.engine.respond(&request, RequestClass::GenericAsset),
    )
    .await
    .expect("stored asset should not wait on the network")
    .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"stale"));
    assert_eq!(response.source, ResponseSource::Cache);

    f.network.release();
    f.background.drain().await;
    assert_eq!(
      stored_body(&f.caches, "/static/js/main.js"),
      Some(Bytes::from_static(b"fresh"))
    );
  }

  #[tokio::test]
  async fn test_asset_background_failure_leaves_store_unchanged() {
    let f = fixture(MockNetwork::new().fail("/static/js/main.js"));
    seed(&f.caches, "/static/js/main.js", "stale");
    let before = f
      .caches
      .open("v2")
      .unwrap()
      .get(&RequestIdentity::get(&url("/static/js/main.js")))
      .unwrap();

    let request = InterceptedRequest::get(url("/static/js/main.js"));
    let response = f
      .engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"stale"));

    f.background.drain().await;
    let after = f
      .caches
      .open("v2")
      .unwrap()
      .get(&RequestIdentity::get(&url("/static/js/main.js")))
      .unwrap();
    assert_eq!(before, after);
    assert_eq!(f.network.calls(), vec!["GET /static/js/main.js"]);
  }

  #[tokio::test]
  async fn test_asset_background_non_ok_is_not_stored() {
    let f = fixture(MockNetwork::new().route("/logo.png", 502, "bad gateway"));
    seed(&f.caches, "/logo.png", "png");

    let request = InterceptedRequest::get(url("/logo.png"));
    f.engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();

    f.background.drain().await;
    assert_eq!(
      stored_body(&f.caches, "/logo.png"),
      Some(Bytes::from_static(b"png"))
    );
  }

  #[tokio::test]
  async fn test_asset_miss_is_stored_before_returning() {
    let f = fixture(MockNetwork::new().route("/static/css/app.css", 200, "body{}"));
    let request = InterceptedRequest::get(url("/static/css/app.css"));

    let response = f
      .engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(f.background.pending(), 0);
    assert_eq!(
      stored_body(&f.caches, "/static/css/app.css"),
      Some(Bytes::from_static(b"body{}"))
    );
  }

  #[tokio::test]
  async fn test_partial_content_is_never_stored() {
    let f = fixture(MockNetwork::new().route("/media/intro.mp4", 206, "ABCD"));
    let request = InterceptedRequest::get(url("/media/intro.mp4"));

    let response = f
      .engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert!(stored_body(&f.caches, "/media/intro.mp4").is_none());

    seed(&f.caches, "/media/intro.mp4", "full video");
    f.engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();
    f.background.drain().await;
    assert_eq!(
      stored_body(&f.caches, "/media/intro.mp4"),
      Some(Bytes::from_static(b"full video"))
    );
  }

  #[tokio::test]
  async fn test_asset_miss_offline_propagates() {
    let f = fixture(MockNetwork::new());
    f.network.set_offline(true);

    let request = InterceptedRequest::get(url("/static/css/app.css"));
    let err = f
      .engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap_err();
    assert!(matches!(err, RelayError::NetworkFailure(_)));
  }

  #[tokio::test]
  async fn test_broken_store_degrades_to_network() {
    let network = Arc::new(MockNetwork::new().route("/app.js", 200, "js"));
    let background = BackgroundTasks::new();
    let engine = StrategyEngine::new(
      CacheStorage::new(Arc::new(BrokenStore)),
      network,
      "v2",
      background.clone(),
    );

    let request = InterceptedRequest::get(url("/app.js"));
    let response = engine
      .respond(&request, RequestClass::GenericAsset)
      .await
      .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"js"));
    assert_eq!(response.source, ResponseSource::Network);
    background.drain().await;
  }
}
