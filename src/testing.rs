//! Test doubles shared by the module tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use url::Url;

use crate::error::{RelayError, Result};
use crate::network::{Network, NetworkResponse};
use crate::notify::{Notification, NotificationHost, NotificationId};
use crate::request::InterceptedRequest;
use crate::store::{ContentStore, MemoryStore, RequestIdentity, StoredEntry};

pub const ORIGIN: &str = "https://fatslim.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Route {
  Respond(u16, Bytes),
  Fail,
}

/// Scripted network keyed by URL path. Unknown paths answer 404.
pub struct MockNetwork {
  routes: Mutex<HashMap<String, Route>>,
  offline: AtomicBool,
  gate: watch::Sender<bool>,
  calls: Mutex<Vec<String>>,
}

impl MockNetwork {
  pub fn new() -> Self {
    let (gate, _) = watch::channel(true);
    Self {
      routes: Mutex::new(HashMap::new()),
      offline: AtomicBool::new(false),
      gate,
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn route(self, path: &str, status: u16, body: &str) -> Self {
    self.set_route(path, status, body);
    self
  }

  pub fn set_route(&self, path: &str, status: u16, body: &str) {
    self.routes.lock().unwrap().insert(
      path.to_string(),
      Route::Respond(status, Bytes::copy_from_slice(body.as_bytes())),
    );
  }

  pub fn fail(self, path: &str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), Route::Fail);
    self
  }

  /// Make every fetch fail.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Hold every fetch until `release` is called.
  pub fn hold(&self) {
    self.gate.send_replace(false);
  }

  pub fn release(&self) {
    self.gate.send_replace(true);
  }

  /// Method and path of every fetch, in arrival order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &InterceptedRequest) -> Result<NetworkResponse> {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, request.url.path()));

    let mut gate = self.gate.subscribe();
    let _ = gate.wait_for(|open| *open).await;

    if self.offline.load(Ordering::SeqCst) {
      return Err(RelayError::NetworkFailure("offline".to_string()));
    }

    let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
    match route {
      Some(Route::Respond(status, body)) => Ok(NetworkResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body,
      }),
      Some(Route::Fail) => Err(RelayError::NetworkFailure(format!(
        "connection reset: {}",
        request.url
      ))),
      None => Ok(NetworkResponse {
        status: StatusCode::NOT_FOUND,
        headers: HeaderMap::new(),
        body: Bytes::new(),
      }),
    }
  }
}

/// Memory store that counts every call.
#[derive(Default)]
pub struct CountingStore {
  inner: MemoryStore,
  pub reads: AtomicUsize,
  pub writes: AtomicUsize,
}

impl CountingStore {
  pub fn accesses(&self) -> usize {
    self.reads.load(Ordering::SeqCst) + self.writes.load(Ordering::SeqCst)
  }
}

impl ContentStore for CountingStore {
  fn create(&self, generation: &str) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.create(generation)
  }

  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.get(generation, identity)
  }

  fn put(&self, generation: &str, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.put(generation, identity, entry)
  }

  fn identities(&self, generation: &str) -> Result<Vec<RequestIdentity>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.identities(generation)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    self.inner.delete(generation)
  }

  fn list_names(&self) -> Result<Vec<String>> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    self.inner.list_names()
  }
}

/// Store whose every operation fails.
pub struct BrokenStore;

impl ContentStore for BrokenStore {
  fn create(&self, _generation: &str) -> Result<()> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }

  fn get(&self, _generation: &str, _identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }

  fn put(&self, _generation: &str, _identity: &RequestIdentity, _entry: &StoredEntry) -> Result<()> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }

  fn identities(&self, _generation: &str) -> Result<Vec<RequestIdentity>> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }

  fn delete(&self, _generation: &str) -> Result<bool> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }

  fn list_names(&self) -> Result<Vec<String>> {
    Err(RelayError::StoreUnavailable("disk gone".to_string()))
  }
}

/// Memory store that refuses to delete one generation.
pub struct StuckGenerationStore {
  inner: MemoryStore,
  stuck: String,
}

impl StuckGenerationStore {
  pub fn new(stuck: &str) -> Self {
    Self {
      inner: MemoryStore::new(),
      stuck: stuck.to_string(),
    }
  }
}

impl ContentStore for StuckGenerationStore {
  fn create(&self, generation: &str) -> Result<()> {
    self.inner.create(generation)
  }

  fn get(&self, generation: &str, identity: &RequestIdentity) -> Result<Option<StoredEntry>> {
    self.inner.get(generation, identity)
  }

  fn put(&self, generation: &str, identity: &RequestIdentity, entry: &StoredEntry) -> Result<()> {
    self.inner.put(generation, identity, entry)
  }

  fn identities(&self, generation: &str) -> Result<Vec<RequestIdentity>> {
    self.inner.identities(generation)
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    if generation == self.stuck {
      return Err(RelayError::StoreUnavailable(format!("{} is locked", generation)));
    }
    self.inner.delete(generation)
  }

  fn list_names(&self) -> Result<Vec<String>> {
    self.inner.list_names()
  }
}

/// Notification host that records what it was asked to do.
#[derive(Default)]
pub struct RecordingHost {
  pub shown: Mutex<Vec<Notification>>,
  pub closed: Mutex<Vec<NotificationId>>,
  pub opened: Mutex<Vec<String>>,
}

impl NotificationHost for RecordingHost {
  fn show(&self, notification: &Notification) {
    self.shown.lock().unwrap().push(notification.clone());
  }

  fn close(&self, id: NotificationId) {
    self.closed.lock().unwrap().push(id);
  }

  fn open_window(&self, url: &str) {
    self.opened.lock().unwrap().push(url.to_string());
  }
}
