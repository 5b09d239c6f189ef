//! Rooms, activities, educational groups and RFID devices.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::Id;

/// Name of the schoolyard room, the only room where a check-in may create an
/// active group on demand.
pub const SCHULHOF_ROOM_NAME: &str = "Schulhof";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
  pub id:       Id,
  /// Unique across the organisation.
  pub name:     String,
  pub building: Option<String>,
  pub floor:    Option<i32>,
  pub capacity: Option<u32>,
  pub category: Option<String>,
}

impl Room {
  pub fn is_schulhof(&self) -> bool { self.name == SCHULHOF_ROOM_NAME }
}

#[derive(Debug, Clone, Default)]
pub struct NewRoom {
  pub name:     String,
  pub building: Option<String>,
  pub floor:    Option<i32>,
  pub capacity: Option<u32>,
  pub category: Option<String>,
}

impl NewRoom {
  pub fn named(name: &str) -> Self {
    Self { name: name.into(), ..Self::default() }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
  pub id:               Id,
  pub name:             String,
  pub category:         Option<String>,
  pub supervisor_id:    Option<Id>,
  /// Open activities accept any student; closed ones have a roster.
  pub is_open:          bool,
  pub max_participants: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
  pub name:             String,
  pub category:         Option<String>,
  pub supervisor_id:    Option<Id>,
  pub is_open:          bool,
  pub max_participants: Option<u32>,
}

impl NewActivity {
  pub fn open(name: &str) -> Self {
    Self {
      name:             name.into(),
      category:         None,
      supervisor_id:    None,
      is_open:          true,
      max_participants: None,
    }
  }
}

/// A class cohort. Staff members assigned to it receive its `edu:<id>` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationalGroup {
  pub id:                  Id,
  pub name:                String,
  /// Local time of day after which a checkout ends the student's day.
  pub daily_checkout_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
  Active,
  Inactive,
}

impl DeviceStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      DeviceStatus::Active => "active",
      DeviceStatus::Inactive => "inactive",
    }
  }
}

/// An RFID reader authenticated by API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
  pub id:        Id,
  pub device_id: String,
  pub name:      Option<String>,
  pub status:    DeviceStatus,
}
