//! Push notifications: payload parsing, display, and click routing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::config::NotificationsConfig;
use crate::error::RelayError;

/// Unique identifier for a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u64);

impl NotificationId {
  fn next() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }
}

impl fmt::Display for NotificationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Payload delivered by the push service. Every field is optional.
#[derive(Debug, Clone, Default)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  data: Option<Value>,
}

impl PushPayload {
  /// Pick the known fields out of a JSON object; a field of the wrong type counts as absent.
  fn from_object(object: &Map<String, Value>) -> Self {
    let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
    Self {
      title: text("title"),
      body: text("body"),
      data: object.get("data").filter(|v| !v.is_null()).cloned(),
    }
  }
}

/// A notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub id: NotificationId,
  pub title: String,
  pub body: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
  /// Opaque data from the payload, passed through verbatim
  pub data: Value,
}

impl Notification {
  /// Where a click should take the user.
  pub fn target_url(&self) -> &str {
    self
      .data
      .get("url")
      .and_then(Value::as_str)
      .filter(|url| !url.is_empty())
      .unwrap_or("/")
  }
}

/// The host's notification service. Calls are fire-and-forget.
pub trait NotificationHost: Send + Sync {
  fn show(&self, notification: &Notification);
  fn close(&self, id: NotificationId);
  fn open_window(&self, url: &str);
}

/// Host that only logs; used when there is no desktop to draw on.
pub struct LogNotificationHost;

impl NotificationHost for LogNotificationHost {
  fn show(&self, notification: &Notification) {
    info!(id = %notification.id, title = %notification.title, body = %notification.body, "Notification shown");
  }

  fn close(&self, id: NotificationId) {
    debug!(id = %id, "Notification closed");
  }

  fn open_window(&self, url: &str) {
    info!(url = %url, "Opening application window");
  }
}

/// Turns push payloads into notifications and routes clicks back into the app.
pub struct NotificationDispatcher {
  host: Arc<dyn NotificationHost>,
  defaults: NotificationsConfig,
  shown: Mutex<HashMap<NotificationId, Notification>>,
}

impl NotificationDispatcher {
  pub fn new(host: Arc<dyn NotificationHost>, defaults: NotificationsConfig) -> Self {
    Self {
      host,
      defaults,
      shown: Mutex::new(HashMap::new()),
    }
  }

  /// Display a notification for a push payload.
  pub fn on_push(&self, raw: Option<&[u8]>) -> Notification {
    let payload = parse_payload(raw);

    let notification = Notification {
      id: NotificationId::next(),
      title: non_empty(payload.title).unwrap_or_else(|| self.defaults.default_title.clone()),
      body: non_empty(payload.body).unwrap_or_else(|| self.defaults.default_body.clone()),
      icon: self.defaults.icon.clone(),
      data: payload.data.unwrap_or_else(|| Value::Object(Map::new())),
    };

    self
      .shown
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(notification.id, notification.clone());
    self.host.show(&notification);

    notification
  }

  /// Close a clicked notification and open the app at its target. Unknown ids are ignored.
  pub fn on_click(&self, id: NotificationId) -> Option<String> {
    let notification = self
      .shown
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&id);

    let Some(notification) = notification else {
      debug!(id = %id, "Click on unknown notification ignored");
      return None;
    };

    self.host.close(id);
    let target = notification.target_url().to_string();
    self.host.open_window(&target);
    Some(target)
  }
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.is_empty())
}

/// Parse a push payload; anything but a JSON object yields empty defaults.
fn parse_payload(raw: Option<&[u8]>) -> PushPayload {
  let Some(bytes) = raw.filter(|b| !b.is_empty()) else {
    return PushPayload::default();
  };

  let parsed = serde_json::from_slice::<Value>(bytes)
    .map_err(|e| RelayError::MalformedPushPayload(e.to_string()))
    .and_then(|value| match value {
      Value::Object(object) => Ok(PushPayload::from_object(&object)),
      other => Err(RelayError::MalformedPushPayload(format!(
        "expected a JSON object, got {}",
        other
      ))),
    });

  match parsed {
    Ok(payload) => payload,
    Err(err) => {
      warn!(error = %err, "Using notification defaults");
      PushPayload::default()
    }
  }
}
