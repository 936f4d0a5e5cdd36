//! Store generation lifecycle: setup (precache) and activation (garbage collection).
//!
//! ```text
//! installing ──setup done──▶ installed ──activate──▶ active ──superseded──▶ retired
//! ```
//!
//! Setup always requests skip-waiting, so a freshly installed generation preempts whatever is
//! currently active without waiting for traffic to quiesce.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::RequestClass;
use crate::error::Result;
use crate::network::Network;
use crate::request::InterceptedRequest;
use crate::store::{CacheStorage, RequestIdentity};

/// Unresolved build-time placeholders that mark a precache path as broken.
const BAD_PLACEHOLDERS: &[&str] = &["%PUBLIC_URL%", "${", "{{"];

/// Lifecycle state of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  Installing,
  Installed,
  Active,
  Retired,
}

impl fmt::Display for GenerationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Installing => write!(f, "installing"),
      Self::Installed => write!(f, "installed"),
      Self::Active => write!(f, "active"),
      Self::Retired => write!(f, "retired"),
    }
  }
}

/// Which generation occupies each lifecycle slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
  pub installing: Option<String>,
  /// Installed, waiting for activation
  pub waiting: Option<String>,
  pub active: Option<String>,
  /// Activate as soon as installation completes
  pub skip_waiting: bool,
  /// Whether the active generation has claimed all traffic
  pub controlling: bool,
}

impl Registration {
  pub fn state_of(&self, generation: &str) -> Option<GenerationState> {
    let is = |slot: &Option<String>| slot.as_deref() == Some(generation);
    if is(&self.installing) {
      Some(GenerationState::Installing)
    } else if is(&self.waiting) {
      Some(GenerationState::Installed)
    } else if is(&self.active) {
      Some(GenerationState::Active)
    } else {
      None
    }
  }
}

/// Outcome of populating a generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub cached: Vec<String>,
  /// Paths dropped before fetching because they are structurally invalid
  pub skipped: Vec<String>,
  /// Paths that could not be fetched or stored, with the reason
  pub failed: Vec<(String, String)>,
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub active: String,
  pub retired: Vec<String>,
  pub failed: Vec<(String, String)>,
}

/// Whether a precache path can be stored at all.
pub fn is_valid_precache_path(path: &str) -> bool {
  if path.is_empty() || !path.starts_with('/') {
    return false;
  }

  if BAD_PLACEHOLDERS.iter().any(|p| path.contains(p)) || has_percent_token(path) {
    return false;
  }

  !path
    .split(['/', '?', '#'])
    .any(|segment| segment == "undefined" || segment == "null")
}

/// Detect `%NAME%` tokens left behind by a template step.
fn has_percent_token(path: &str) -> bool {
  let pieces: Vec<&str> = path.split('%').collect();
  // Only inner pieces are enclosed by '%' on both sides
  pieces
    .iter()
    .skip(1)
    .take(pieces.len().saturating_sub(2))
    .any(|token| {
      // A leading digit is a percent-encoded byte, not a name
      token.len() > 2
        && token.starts_with(|c: char| c.is_ascii_uppercase() || c == '_')
        && token
          .chars()
          .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    })
}

/// Governs store versioning and garbage collection of stale generations.
pub struct LifecycleManager {
  caches: CacheStorage,
  network: Arc<dyn Network>,
  origin: Url,
  version: String,
  precache: Vec<String>,
  registration: RwLock<Registration>,
}

impl LifecycleManager {
  pub fn new(
    caches: CacheStorage,
    network: Arc<dyn Network>,
    origin: Url,
    version: impl Into<String>,
    precache: Vec<String>,
  ) -> Self {
    Self {
      caches,
      network,
      origin,
      version: version.into(),
      precache,
      registration: RwLock::new(Registration::default()),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub async fn registration(&self) -> Registration {
    self.registration.read().await.clone()
  }

  /// Create the current generation and populate it from the precache set.
  ///
  /// Individual assets that are invalid or unreachable are collected in the report; only an
  /// unusable store fails setup.
  pub async fn install(&self) -> Result<InstallReport> {
    self.registration.write().await.installing = Some(self.version.clone());
    info!(generation = %self.version, "Installing generation");

    let generation = match self.caches.open(&self.version) {
      Ok(generation) => generation,
      Err(e) => {
        self.registration.write().await.installing = None;
        return Err(e);
      }
    };

    let mut report = InstallReport {
      generation: self.version.clone(),
      ..Default::default()
    };

    let mut targets = Vec::new();
    for path in &self.precache {
      if !is_valid_precache_path(path) {
        warn!(path = %path, "Skipping invalid precache path");
        report.skipped.push(path.clone());
        continue;
      }
      match self.origin.join(path) {
        Ok(url) => targets.push((path.clone(), url)),
        Err(e) => {
          warn!(path = %path, error = %e, "Skipping unparseable precache path");
          report.skipped.push(path.clone());
        }
      }
    }

    let fetches = targets.iter().map(|(_, url)| {
      let request = InterceptedRequest::get(url.clone());
      let network = Arc::clone(&self.network);
      async move { network.fetch(&request).await }
    });
    let responses = join_all(fetches).await;

    for ((path, url), response) in targets.into_iter().zip(responses) {
      let outcome = match response {
        Ok(response) if response.is_storable() => generation
          .put(&RequestIdentity::get(&url), &response.snapshot())
          .map_err(|e| e.to_string()),
        Ok(response) => Err(format!("HTTP {}", response.status)),
        Err(e) => Err(e.to_string()),
      };

      match outcome {
        Ok(()) => {
          debug!(path = %path, class = RequestClass::PrecacheAsset.as_str(), "Precached");
          report.cached.push(path);
        }
        Err(reason) => {
          warn!(path = %path, reason = %reason, "Failed to precache asset");
          report.failed.push((path, reason));
        }
      }
    }

    {
      let mut registration = self.registration.write().await;
      registration.installing = None;
      registration.waiting = Some(self.version.clone());
      registration.skip_waiting = true;
    }

    info!(
      generation = %self.version,
      cached = report.cached.len(),
      skipped = report.skipped.len(),
      failed = report.failed.len(),
      "Generation installed"
    );

    Ok(report)
  }

  /// Make the current generation active, delete every other generation, and claim traffic.
  ///
  /// Deletions run as independent tasks; their failures are logged and reported, never
  /// propagated.
  pub async fn activate(&self) -> ActivationReport {
    {
      let mut registration = self.registration.write().await;
      let promoted = registration
        .waiting
        .take()
        .unwrap_or_else(|| self.version.clone());
      if let Some(previous) = registration.active.replace(promoted) {
        if previous != self.version {
          debug!(generation = %previous, state = %GenerationState::Retired, "Superseded");
        }
      }
      registration.skip_waiting = false;
    }

    let mut report = ActivationReport {
      active: self.version.clone(),
      ..Default::default()
    };

    let names = match self.caches.list_names() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Could not enumerate generations, skipping cleanup");
        Vec::new()
      }
    };

    let deletions: Vec<_> = names
      .into_iter()
      .filter(|name| name != &self.version)
      .map(|name| {
        let caches = self.caches.clone();
        tokio::spawn(async move {
          let result = caches.delete(&name);
          (name, result)
        })
      })
      .collect();

    for joined in join_all(deletions).await {
      match joined {
        Ok((name, Ok(_))) => {
          info!(generation = %name, "Deleted stale generation");
          report.retired.push(name);
        }
        Ok((name, Err(e))) => {
          warn!(generation = %name, error = %e, "Failed to delete stale generation");
          report.failed.push((name, e.to_string()));
        }
        Err(e) => warn!(error = %e, "Generation deletion task failed"),
      }
    }

    self.registration.write().await.controlling = true;
    info!(generation = %self.version, "Generation active and controlling traffic");

    report
  }

  /// Force an installed generation to activate now.
  ///
  /// Returns `None` when nothing is waiting. A generation still installing remembers the
  /// request instead.
  pub async fn skip_waiting(&self) -> Option<ActivationReport> {
    {
      let mut registration = self.registration.write().await;
      if registration.waiting.is_none() {
        if registration.installing.is_some() {
          registration.skip_waiting = true;
        }
        debug!("Nothing waiting to activate");
        return None;
      }
    }

    Some(self.activate().await)
  }

  /// Whether the installed generation asked to preempt the active one.
  pub async fn wants_activation(&self) -> bool {
    let registration = self.registration.read().await;
    registration.skip_waiting && registration.waiting.is_some()
  }
}
