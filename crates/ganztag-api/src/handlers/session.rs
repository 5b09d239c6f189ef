//! Device sessions: the active group an RFID reader drives.
//!
//! | Method | Path                   | Notes                                 |
//! |--------|------------------------|---------------------------------------|
//! | `POST` | `/iot/session/start`   | replaces any group bound to the device |
//! | `POST` | `/iot/session/end`     | 404 if nothing is bound               |
//! | `GET`  | `/iot/session/current` | 404 if nothing is bound               |

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use ganztag_core::{
  Error as CoreError, Id,
  device_session::{end_session, start_session},
  session::ActiveGroup,
  store::ActiveStore,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{
  AppState,
  auth::{DeviceContext, verify_pin},
  error::ApiError,
  extract::{ApiJson, Envelope, success, success_with},
};

#[derive(Debug, Deserialize)]
pub struct StartBody {
  pub activity_id:   Id,
  pub room_id:       Id,
  pub supervisor_id: Option<Id>,
  pub pin:           Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionData {
  pub active_group_id: Id,
  pub activity_id:     Id,
  pub room_id:         Id,
  pub room_name:       String,
  pub start_time:      DateTime<Utc>,
  pub supervisor_id:   Option<Id>,
}

/// Check the supervisor's PIN, if one is set, before anything is written.
async fn authorise_supervisor<S>(state: &AppState<S>, staff_id: Id, pin: Option<String>) -> Result<(), ApiError>
where
  S: ActiveStore + 'static,
{
  let person = state
    .store
    .read(move |tx| tx.get_person(staff_id))
    .await
    .map_err(ApiError::from_classified)?
    .ok_or_else(|| ApiError::NotFound(format!("staff member {staff_id} not found")))?;
  let staff = person.as_staff().ok_or(CoreError::NotStaff(staff_id))?;

  if let Some(phc) = &staff.pin_hash {
    let pin = pin.unwrap_or_default();
    let phc = phc.clone();
    let ok = tokio::task::spawn_blocking(move || verify_pin(&pin, &phc))
      .await
      .map_err(|e| ApiError::Internal(format!("pin verification task failed: {e}")))?;
    if !ok {
      return Err(CoreError::InvalidPin.into());
    }
  }
  Ok(())
}

/// `POST /iot/session/start`
pub async fn start<S>(
  State(state): State<AppState<S>>,
  device: DeviceContext,
  ApiJson(body): ApiJson<StartBody>,
) -> Result<Json<Envelope<SessionData>>, ApiError>
where
  S: ActiveStore + 'static,
{
  let StartBody { activity_id, room_id, supervisor_id, pin } = body;
  if let Some(staff_id) = supervisor_id {
    authorise_supervisor(&state, staff_id, pin).await?;
  }

  let device_id = device.device.id;
  let started = state
    .store
    .transact(None, move |tx| start_session(tx, device_id, activity_id, room_id, supervisor_id, Utc::now()))
    .await
    .map_err(ApiError::from_classified)?;

  state.hub.broadcast_all(started.events);
  info!(device = %device.device.device_id, active_group_id = started.group.id, "device session started");

  Ok(success_with(
    SessionData {
      active_group_id: started.group.id,
      activity_id:     started.group.activity_id,
      room_id:         started.group.room_id,
      room_name:       started.room_name,
      start_time:      started.group.start_time,
      supervisor_id,
    },
    "Session started successfully",
  ))
}

/// `POST /iot/session/end`
pub async fn end<S>(
  State(state): State<AppState<S>>,
  device: DeviceContext,
) -> Result<Json<Envelope<Value>>, ApiError>
where
  S: ActiveStore + 'static,
{
  let device_id = device.device.id;
  let ended = state
    .store
    .transact(None, move |tx| end_session(tx, device_id, Utc::now()))
    .await
    .map_err(ApiError::from_classified)?;

  state.hub.broadcast_all(ended.events);
  info!(device = %device.device.device_id, active_group_id = ended.active_group_id, "device session ended");

  Ok(success_with(
    json!({ "active_group_id": ended.active_group_id, "room_name": ended.room_name }),
    "Session ended successfully",
  ))
}

/// `GET /iot/session/current`
pub async fn current<S>(
  State(state): State<AppState<S>>,
  device: DeviceContext,
) -> Result<Json<Envelope<ActiveGroup>>, ApiError>
where
  S: ActiveStore + 'static,
{
  let device_id = device.device.id;
  let group = state
    .store
    .read(move |tx| tx.find_device_active_group(device_id))
    .await
    .map_err(ApiError::from_classified)?
    .ok_or(CoreError::NoActiveSessionForDevice)?;
  Ok(success(group))
}
