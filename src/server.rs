//! HTTP front end: proxies the hosted application through the relay and exposes the control,
//! push and notification endpoints under `/__relay/`.

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::network::is_hop_by_hop;
use crate::notify::NotificationId;
use crate::relay::Relay;
use crate::request::InterceptedRequest;
use crate::response::RelayResponse;

const RELAY_PREFIX: &str = "/__relay/";

/// Largest request body accepted for forwarding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response header naming where the body came from.
pub const SOURCE_HEADER: &str = "x-relay-source";

#[derive(Debug, Serialize)]
struct ErrorResponse {
  error: String,
}

impl IntoResponse for RelayError {
  fn into_response(self) -> Response {
    let status = match self {
      RelayError::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
      RelayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      RelayError::InvalidRequest(_)
      | RelayError::MalformedPushPayload(_)
      | RelayError::UnrecognizedControlMessage(_) => StatusCode::BAD_REQUEST,
    };

    (status, Json(ErrorResponse { error: self.to_string() })).into_response()
  }
}

impl IntoResponse for RelayResponse {
  fn into_response(self) -> Response {
    let mut response = Response::new(Body::from(self.body));
    *response.status_mut() = self.status;

    let headers = response.headers_mut();
    for (name, value) in self.headers.iter() {
      if !is_hop_by_hop(name) {
        headers.append(name, value.clone());
      }
    }
    headers.insert(
      HeaderName::from_static(SOURCE_HEADER),
      HeaderValue::from_static(self.source.as_str()),
    );

    response
  }
}

pub fn create_router(relay: Arc<Relay>) -> Router {
  Router::new()
    .route("/__relay/message", post(message))
    .route("/__relay/push", post(push))
    .route("/__relay/notifications/{id}/click", post(notification_click))
    .fallback(intercept)
    .with_state(relay)
}

/// Bind `addr` and serve until Ctrl-C, then drain background work.
pub async fn serve(relay: Arc<Relay>, addr: SocketAddr) -> Result<()> {
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  info!(listen = %addr, origin = %relay.origin(), "Relay listening");

  axum::serve(listener, create_router(Arc::clone(&relay)))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  relay.shutdown().await;
  info!("Relay stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!("Shutdown requested");
}

async fn intercept(State(relay): State<Arc<Relay>>, request: Request) -> Response {
  let (parts, body) = request.into_parts();

  let path_and_query = parts
    .uri
    .path_and_query()
    .map(|pq| pq.as_str())
    .unwrap_or("/");
  if path_and_query.starts_with(RELAY_PREFIX) {
    return (
      StatusCode::NOT_FOUND,
      Json(ErrorResponse {
        error: format!("Unknown relay endpoint: {}", parts.uri.path()),
      }),
    )
      .into_response();
  }

  let url = match relay.resolve(path_and_query) {
    Ok(url) => url,
    Err(e) => return e.into_response(),
  };

  let body = match to_bytes(body, MAX_BODY_BYTES).await {
    Ok(bytes) if bytes.is_empty() => None,
    Ok(bytes) => Some(bytes),
    Err(e) => {
      return RelayError::InvalidRequest(format!("Failed to read request body: {}", e))
        .into_response()
    }
  };

  let request = InterceptedRequest::from_parts(parts.method, url, parts.headers, body);
  match relay.on_fetch(request).await {
    Ok(response) => response.into_response(),
    Err(e) => e.into_response(),
  }
}

async fn message(State(relay): State<Arc<Relay>>, body: Bytes) -> StatusCode {
  relay.on_message(&parse_message(&body)).await;
  StatusCode::ACCEPTED
}

/// JSON if it parses, otherwise the raw text as a bare directive.
fn parse_message(body: &[u8]) -> Value {
  serde_json::from_slice(body)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).trim().to_string()))
}

async fn push(State(relay): State<Arc<Relay>>, body: Bytes) -> Response {
  let notification = relay.on_push(Some(&body[..]));
  (StatusCode::CREATED, Json(notification)).into_response()
}

async fn notification_click(
  State(relay): State<Arc<Relay>>,
  Path(id): Path<u64>,
) -> Response {
  let Some(target) = relay.on_notification_click(NotificationId(id)) else {
    return (
      StatusCode::NOT_FOUND,
      Json(ErrorResponse {
        error: format!("Unknown notification: {}", id),
      }),
    )
      .into_response();
  };

  match relay.origin().join(&target) {
    Ok(url) => Json(json!({ "url": url })).into_response(),
    Err(e) => RelayError::InvalidRequest(format!("{}: {}", target, e)).into_response(),
  }
}
