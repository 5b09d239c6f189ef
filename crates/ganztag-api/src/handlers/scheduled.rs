//! Scheduled checkouts created and cancelled by staff.
//!
//! Execution happens in the server's background worker, not here.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use ganztag_core::{
  Id,
  scheduled::{cancel_checkout, schedule_checkout},
  session::{NewScheduledCheckout, ScheduledCheckout},
  store::ActiveStore,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
  AppState,
  auth::StaffIdentity,
  error::ApiError,
  extract::{ApiJson, ApiPath, Envelope, success, success_with},
};

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub student_id:    Id,
  pub scheduled_for: DateTime<Utc>,
  pub reason:        Option<String>,
}

/// `POST /api/scheduled-checkouts`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  staff: StaffIdentity,
  ApiJson(body): ApiJson<CreateBody>,
) -> Result<(StatusCode, Json<Envelope<ScheduledCheckout>>), ApiError>
where
  S: ActiveStore + 'static,
{
  let input = NewScheduledCheckout {
    student_id:    body.student_id,
    scheduled_by:  staff.staff_id,
    scheduled_for: body.scheduled_for,
    reason:        body.reason.filter(|r| !r.trim().is_empty()),
  };
  let checkout = state
    .store
    .transact(None, move |tx| schedule_checkout(tx, input))
    .await
    .map_err(ApiError::from_classified)?;

  info!(
    checkout_id = checkout.id,
    student_id = checkout.student_id,
    scheduled_for = %checkout.scheduled_for,
    "checkout scheduled",
  );
  Ok((StatusCode::CREATED, success(checkout)))
}

/// `DELETE /api/scheduled-checkouts/{id}`
pub async fn cancel<S>(
  State(state): State<AppState<S>>,
  staff: StaffIdentity,
  ApiPath(id): ApiPath<Id>,
) -> Result<Json<Envelope<Value>>, ApiError>
where
  S: ActiveStore + 'static,
{
  let actor = staff.staff_id;
  state
    .store
    .transact(None, move |tx| cancel_checkout(tx, id, actor, Utc::now()))
    .await
    .map_err(ApiError::from_classified)?;

  info!(checkout_id = id, cancelled_by = actor, "scheduled checkout cancelled");
  Ok(success_with(json!({ "id": id }), "Scheduled checkout cancelled"))
}
