//! The request interception boundary.
//!
//! A [`Relay`] owns one instance of every component and exposes one handler per event kind.
//! The hosting runtime (the HTTP front end or the CLI) registers these handlers explicitly;
//! nothing is wired up through global state.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::classify;
use crate::config::Config;
use crate::control::ControlMessage;
use crate::error::{RelayError, Result};
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleManager};
use crate::network::Network;
use crate::notify::{Notification, NotificationDispatcher, NotificationHost, NotificationId};
use crate::request::InterceptedRequest;
use crate::response::RelayResponse;
use crate::store::{CacheStorage, ContentStore};
use crate::strategy::StrategyEngine;
use crate::tasks::BackgroundTasks;

pub struct Relay {
  origin: Url,
  api_prefix: String,
  caches: CacheStorage,
  lifecycle: LifecycleManager,
  engine: StrategyEngine,
  notifications: NotificationDispatcher,
  background: BackgroundTasks,
}

impl Relay {
  pub fn new(
    config: &Config,
    store: Arc<dyn ContentStore>,
    network: Arc<dyn Network>,
    host: Arc<dyn NotificationHost>,
  ) -> Self {
    let caches = CacheStorage::new(store);
    let background = BackgroundTasks::new();

    let lifecycle = LifecycleManager::new(
      caches.clone(),
      Arc::clone(&network),
      config.origin.clone(),
      config.version.clone(),
      config.precache.clone(),
    );
    let engine = StrategyEngine::new(
      caches.clone(),
      network,
      config.version.clone(),
      background.clone(),
    );

    Self {
      origin: config.origin.clone(),
      api_prefix: config.api_prefix.clone(),
      caches,
      lifecycle,
      engine,
      notifications: NotificationDispatcher::new(host, config.notifications.clone()),
      background,
    }
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  pub fn caches(&self) -> &CacheStorage {
    &self.caches
  }

  pub fn lifecycle(&self) -> &LifecycleManager {
    &self.lifecycle
  }

  /// Resolve a path (plus query) from the hosted application against the origin.
  pub fn resolve(&self, path_and_query: &str) -> Result<Url> {
    if !path_and_query.starts_with('/') {
      return Err(RelayError::InvalidRequest(format!(
        "expected an absolute path, got '{}'",
        path_and_query
      )));
    }
    self
      .origin
      .join(path_and_query)
      .map_err(|e| RelayError::InvalidRequest(format!("{}: {}", path_and_query, e)))
  }

  /// Setup: populate the current generation, then activate it if it asked to skip waiting.
  pub async fn on_install(&self) -> Result<(InstallReport, Option<ActivationReport>)> {
    let report = self.lifecycle.install().await?;

    let activation = if self.lifecycle.wants_activation().await {
      Some(self.lifecycle.activate().await)
    } else {
      None
    };

    Ok((report, activation))
  }

  pub async fn on_activate(&self) -> ActivationReport {
    self.lifecycle.activate().await
  }

  /// Serve one intercepted request.
  pub async fn on_fetch(&self, request: InterceptedRequest) -> Result<RelayResponse> {
    match classify(&request, &self.api_prefix) {
      Some(class) => self.engine.respond(&request, class).await,
      None => {
        debug!(method = %request.method, url = %request.url, "Not intercepted, passing through");
        self.engine.pass_through(&request).await
      }
    }
  }

  /// Handle a control message. Unrecognized messages are ignored.
  pub async fn on_message(&self, message: &Value) {
    let command = match ControlMessage::from_value(message) {
      Ok(command) => command,
      Err(e) => {
        debug!(error = %e, "Ignoring control message");
        return;
      }
    };

    info!(command = command.as_str(), "Control message received");
    match command {
      ControlMessage::SkipWaiting => {
        self.lifecycle.skip_waiting().await;
      }
      ControlMessage::ClearCache => {
        let generation = self.lifecycle.version();
        match self.caches.delete(generation) {
          Ok(existed) => info!(generation = %generation, existed, "Store cleared"),
          Err(e) => warn!(generation = %generation, error = %e, "Failed to clear store"),
        }
      }
    }
  }

  pub fn on_push(&self, payload: Option<&[u8]>) -> Notification {
    self.notifications.on_push(payload)
  }

  pub fn on_notification_click(&self, id: NotificationId) -> Option<String> {
    self.notifications.on_click(id)
  }

  /// Wait for detached writes and refreshes to finish.
  pub async fn shutdown(&self) {
    let pending = self.background.pending();
    if pending > 0 {
      debug!(pending, "Draining background tasks");
    }
    self.background.drain().await;
  }
}
