//! HTTP surface for the ganztag occupancy engine.
//!
//! Two route groups share one [`AppState`]:
//!
//! | Prefix  | Auth           | Purpose                                     |
//! |---------|----------------|---------------------------------------------|
//! | `/iot`  | `X-Device-Key` | RFID scans and device sessions              |
//! | `/api`  | bearer JWT     | SSE stream, scheduled checkouts, settings   |
//!
//! Domain writes happen only inside [`ActiveStore::transact`] closures; the
//! resulting events are broadcast on the hub after the commit.

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod secrets;

pub use error::ApiError;

use std::{sync::Arc, time::Duration};

use axum::{
  Json, Router,
  http::{HeaderValue, Method, header},
  routing::{delete, get, post},
};
use ganztag_core::{checkin::CheckinPolicy, store::ActiveStore};
use ganztag_realtime::{Hub, connection::DEFAULT_HEARTBEAT_INTERVAL};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::{
  catch_panic::CatchPanicLayer,
  cors::{AllowOrigin, Any, CorsLayer},
  trace::TraceLayer,
};
use tracing::warn;

use auth::AuthConfig;
use handlers::{checkin, locations, scheduled, session, settings, sse};
use secrets::SettingsCipher;

pub const DEFAULT_CHECKIN_TIMEOUT: Duration = Duration::from_secs(15);

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables of the HTTP layer.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  /// Deadline for the check-in transaction, measured from request arrival.
  pub checkin_timeout:    Duration,
  pub heartbeat_interval: Duration,
  /// `*` or explicit origins.
  pub cors_origins:       Vec<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      checkin_timeout:    DEFAULT_CHECKIN_TIMEOUT,
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      cors_origins:       vec!["*".into()],
    }
  }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub store:    Arc<S>,
  pub hub:      Arc<Hub>,
  pub policy:   Arc<CheckinPolicy>,
  pub auth:     Arc<AuthConfig>,
  pub cipher:   Arc<SettingsCipher>,
  pub config:   Arc<ApiConfig>,
  /// Cancelled on shutdown; closes open SSE streams.
  pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      hub:      Arc::clone(&self.hub),
      policy:   Arc::clone(&self.policy),
      auth:     Arc::clone(&self.auth),
      cipher:   Arc::clone(&self.cipher),
      config:   Arc::clone(&self.config),
      shutdown: self.shutdown.clone(),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the full application router.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: ActiveStore + 'static,
{
  let cors = cors_layer(&state.config.cors_origins);

  let iot = Router::new()
    .route("/checkin",         post(checkin::checkin::<S>))
    .route("/session/start",   post(session::start::<S>))
    .route("/session/end",     post(session::end::<S>))
    .route("/session/current", get(session::current::<S>));

  let api = Router::new()
    .route("/sse/events",                get(sse::events::<S>))
    .route("/sse/stats",                 get(sse::stats::<S>))
    .route("/scheduled-checkouts",       post(scheduled::create::<S>))
    .route("/scheduled-checkouts/{id}",  delete(scheduled::cancel::<S>))
    .route("/students/locations",        get(locations::list::<S>))
    .route("/settings/{key}",            get(settings::get_one::<S>).put(settings::put::<S>));

  Router::new()
    .route("/health", get(health))
    .nest("/iot", iot)
    .nest("/api", api)
    .with_state(state)
    .layer(CatchPanicLayer::custom(error::panic_response))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

fn cors_layer(origins: &[String]) -> CorsLayer {
  let base = CorsLayer::new()
    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
    .allow_headers([
      header::AUTHORIZATION,
      header::CONTENT_TYPE,
      header::HeaderName::from_static(auth::DEVICE_KEY_HEADER),
    ]);

  if origins.is_empty() || origins.iter().any(|o| o.trim() == "*") {
    return base.allow_origin(Any);
  }

  let parsed: Vec<HeaderValue> = origins
    .iter()
    .filter_map(|o| {
      HeaderValue::from_str(o.trim())
        .inspect_err(|_| warn!(origin = %o, "ignoring invalid CORS origin"))
        .ok()
    })
    .collect();
  base.allow_origin(AllowOrigin::list(parsed))
}
