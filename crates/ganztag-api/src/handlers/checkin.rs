//! `POST /iot/checkin`: one RFID scan.
//!
//! The scan runs as a single transaction whose deadline is the request's
//! check-in timeout. Events are broadcast only after the commit.

use std::{sync::Arc, time::Instant};

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use ganztag_core::{
  Id,
  checkin::{ScanInput, ScanResult, StaffScan, StudentScan, process_scan},
  store::ActiveStore,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  AppState,
  auth::DeviceContext,
  error::ApiError,
  extract::{ApiJson, Envelope, success_with},
};

#[derive(Debug, Deserialize)]
pub struct CheckinBody {
  pub rfid:    String,
  pub room_id: Option<Id>,
}

/// Scan payload: either a student movement or a supervisor toggle.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CheckinData {
  Student(StudentData),
  Staff(StaffData),
}

#[derive(Debug, Serialize)]
pub struct StudentData {
  pub student_id:    Id,
  pub student_name:  String,
  pub action:        &'static str,
  pub visit_id:      Id,
  pub room_name:     String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub previous_room: Option<String>,
  pub processed_at:  DateTime<Utc>,
  pub message:       String,
}

#[derive(Debug, Serialize)]
pub struct StaffData {
  pub staff_id:        Id,
  pub staff_name:      String,
  pub action:          ganztag_core::checkin::SupervisorAction,
  pub active_group_id: Id,
  pub room_name:       String,
  pub processed_at:    DateTime<Utc>,
  pub message:         String,
}

impl From<StudentScan> for StudentData {
  fn from(s: StudentScan) -> Self {
    Self {
      student_id:    s.student_id,
      student_name:  s.student_name,
      action:        s.action.as_str(),
      visit_id:      s.visit_id,
      room_name:     s.room_name,
      previous_room: s.previous_room,
      processed_at:  s.processed_at,
      message:       s.message,
    }
  }
}

impl From<StaffScan> for StaffData {
  fn from(s: StaffScan) -> Self {
    Self {
      staff_id:        s.staff_id,
      staff_name:      s.staff_name,
      action:          s.action,
      active_group_id: s.active_group_id,
      room_name:       s.room_name,
      processed_at:    s.processed_at,
      message:         s.message,
    }
  }
}

pub async fn checkin<S>(
  State(state): State<AppState<S>>,
  device: DeviceContext,
  ApiJson(body): ApiJson<CheckinBody>,
) -> Result<Json<Envelope<CheckinData>>, ApiError>
where
  S: ActiveStore + 'static,
{
  if body.rfid.trim().is_empty() {
    return Err(ApiError::BadRequest("rfid is required".into()));
  }

  let deadline = Instant::now() + state.config.checkin_timeout;
  let input = ScanInput { tag_id: body.rfid, room_id: body.room_id, device_id: device.device.id };
  let policy = Arc::clone(&state.policy);
  let now = Utc::now();

  let outcome = state
    .store
    .transact(Some(deadline), move |tx| process_scan(tx, &input, &policy, now))
    .await
    .map_err(ApiError::from_classified)?;

  let delivered = state.hub.broadcast_all(outcome.events);

  let (data, message) = match outcome.result {
    ScanResult::Student(scan) => {
      info!(
        device = %device.device.device_id,
        student_id = scan.student_id,
        action = scan.action.as_str(),
        delivered,
        "student scan processed",
      );
      let message = format!("Student {} successfully", scan.action.as_str());
      (CheckinData::Student(scan.into()), message)
    }
    ScanResult::Staff(scan) => {
      info!(
        device = %device.device.device_id,
        staff_id = scan.staff_id,
        active_group_id = scan.active_group_id,
        delivered,
        "supervisor scan processed",
      );
      (CheckinData::Staff(scan.into()), "Supervisor scan processed successfully".to_owned())
    }
  };

  Ok(success_with(data, message))
}
