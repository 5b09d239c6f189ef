//! Error types for `ganztag-core`.
//!
//! Every error carries an [`ErrorKind`] so transport layers can map it to a
//! status code without knowing the concrete variant.

use serde::Serialize;
use thiserror::Error;

use crate::Id;

/// Coarse error classification shared by every crate in the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  InvalidRequest,
  Unauthorized,
  Forbidden,
  NotFound,
  Conflict,
  Internal,
}

/// Implemented by every error type that can surface at the HTTP layer.
pub trait Classify {
  fn kind(&self) -> ErrorKind;

  /// Structured details rendered next to the message, if any.
  fn details(&self) -> Option<serde_json::Value> { None }
}

/// Which limit a capacity violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityScope {
  Room,
  Activity,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("RFID tag not found")]
  TagNotFound,

  #[error("person {0} is not a student")]
  NotAStudent(Id),

  #[error("person {0} is not a staff member")]
  NotStaff(Id),

  #[error("student not found: {0}")]
  StudentNotFound(Id),

  #[error("staff member not found: {0}")]
  StaffNotFound(Id),

  #[error("room not found: {0}")]
  RoomNotFound(Id),

  #[error("activity not found: {0}")]
  ActivityNotFound(Id),

  #[error("active group not found: {0}")]
  ActiveGroupNotFound(Id),

  #[error("no active group in room {0}")]
  NoActiveGroupInRoom(String),

  #[error("no active session on this device")]
  NoActiveSessionForDevice,

  #[error("scheduled checkout not found: {0}")]
  ScheduledCheckoutNotFound(Id),

  #[error("setting not found: {0}")]
  SettingNotFound(String),

  #[error("room_id is required when the student is not checked in")]
  NoRoomContext,

  #[error("activity {0:?} for the schoolyard is not configured")]
  SchulhofActivityMissing(String),

  #[error("visit {0} has already ended")]
  VisitAlreadyEnded(Id),

  #[error("active group {0} has already ended")]
  ActiveGroupAlreadyEnded(Id),

  #[error("student {0} already has a pending scheduled checkout")]
  ScheduledCheckoutPending(Id),

  #[error("scheduled checkout {0} is no longer pending")]
  ScheduledCheckoutNotPending(Id),

  #[error("{scope:?} capacity exceeded for {name}: {current}/{max}")]
  CapacityExceeded {
    scope:   CapacityScope,
    id:      Id,
    name:    String,
    current: u32,
    max:     u32,
  },

  #[error("duplicate value for {0}")]
  Duplicate(String),

  #[error("invalid staff PIN")]
  InvalidPin,

  #[error("transaction deadline exceeded")]
  DeadlineExceeded,

  #[error("storage error: {0}")]
  Storage(String),
}

impl Classify for Error {
  fn kind(&self) -> ErrorKind {
    match self {
      Error::NotAStudent(_)
      | Error::NotStaff(_)
      | Error::NoRoomContext => ErrorKind::InvalidRequest,

      Error::InvalidPin => ErrorKind::Unauthorized,

      Error::TagNotFound
      | Error::StudentNotFound(_)
      | Error::StaffNotFound(_)
      | Error::RoomNotFound(_)
      | Error::ActivityNotFound(_)
      | Error::ActiveGroupNotFound(_)
      | Error::NoActiveGroupInRoom(_)
      | Error::NoActiveSessionForDevice
      | Error::ScheduledCheckoutNotFound(_)
      | Error::SettingNotFound(_) => ErrorKind::NotFound,

      Error::VisitAlreadyEnded(_)
      | Error::ActiveGroupAlreadyEnded(_)
      | Error::ScheduledCheckoutPending(_)
      | Error::ScheduledCheckoutNotPending(_)
      | Error::CapacityExceeded { .. }
      | Error::Duplicate(_) => ErrorKind::Conflict,

      Error::SchulhofActivityMissing(_)
      | Error::DeadlineExceeded
      | Error::Storage(_) => ErrorKind::Internal,
    }
  }

  fn details(&self) -> Option<serde_json::Value> {
    let Error::CapacityExceeded { scope, id, name, current, max } = self else {
      return None;
    };
    let (code, id_key) = match scope {
      CapacityScope::Room => ("room_capacity_exceeded", "room_id"),
      CapacityScope::Activity => ("activity_capacity_exceeded", "activity_id"),
    };
    let mut details = serde_json::Map::new();
    details.insert("code".into(), code.into());
    details.insert(id_key.into(), (*id).into());
    details.insert("name".into(), name.clone().into());
    details.insert("current".into(), (*current).into());
    details.insert("max".into(), (*max).into());
    Some(serde_json::Value::Object(details))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
