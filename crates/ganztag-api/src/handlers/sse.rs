//! `GET /api/sse/events` and `GET /api/sse/stats`.

use std::sync::Arc;

use axum::{
  Json,
  body::Body,
  extract::State,
  http::{HeaderValue, header},
  response::Response,
};
use ganztag_core::{store::ActiveStore, subscription::resolve_subscriptions};
use ganztag_realtime::{ConnectionOptions, HubStats, event_stream};
use tracing::info;

use crate::{
  AppState,
  auth::{AdminIdentity, StaffIdentity},
  error::ApiError,
  extract::{Envelope, success},
};

/// Open an event stream for the authenticated staff member.
///
/// Topics are resolved once, at connect time. A staff member who starts
/// supervising another group must reconnect to receive its events.
pub async fn events<S>(State(state): State<AppState<S>>, staff: StaffIdentity) -> Result<Response, ApiError>
where
  S: ActiveStore + 'static,
{
  let staff_id = staff.staff_id;
  let subs = state
    .store
    .read(move |tx| resolve_subscriptions(tx, staff_id))
    .await
    .map_err(ApiError::from_classified)?;
  info!(staff_id, topics = subs.all_topics.len(), "sse client connected");

  let options = ConnectionOptions {
    heartbeat_interval: state.config.heartbeat_interval,
    shutdown:           state.shutdown.clone(),
  };
  let stream = event_stream(Arc::clone(&state.hub), staff_id, subs, options);

  let mut response = Response::new(Body::from_stream(stream));
  let headers = response.headers_mut();
  headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
  headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
  headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
  headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
  Ok(response)
}

/// Hub counters; admin only.
pub async fn stats<S>(State(state): State<AppState<S>>, _admin: AdminIdentity) -> Json<Envelope<HubStats>>
where
  S: ActiveStore + 'static,
{
  success(state.hub.stats())
}
