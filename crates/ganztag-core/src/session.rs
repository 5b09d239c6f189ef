//! Durable room-occupancy state: running groups, visits, supervisions,
//! scheduled checkouts and daily attendance.
//!
//! An [`ActiveGroup`] owns its [`Visit`]s and [`Supervision`]s; ending the
//! group closes both. Visits and supervisions refer back to their group by
//! id only.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

// ─── Active groups ───────────────────────────────────────────────────────────

/// A running instance of an activity in a room.
///
/// At most one non-ended group exists per `(room_id, device_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveGroup {
  pub id:            Id,
  pub activity_id:   Id,
  pub room_id:       Id,
  pub device_id:     Option<Id>,
  pub start_time:    DateTime<Utc>,
  pub end_time:      Option<DateTime<Utc>>,
  pub last_activity: DateTime<Utc>,
}

impl ActiveGroup {
  pub fn is_running(&self) -> bool { self.end_time.is_none() }
}

#[derive(Debug, Clone)]
pub struct NewActiveGroup {
  pub activity_id: Id,
  pub room_id:     Id,
  pub device_id:   Option<Id>,
  pub start_time:  DateTime<Utc>,
}

// ─── Visits ──────────────────────────────────────────────────────────────────

/// One student's stay in one active group.
///
/// For any student at most one visit with `exit_time == None` exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
  pub id:              Id,
  pub student_id:      Id,
  pub active_group_id: Id,
  pub entry_time:      DateTime<Utc>,
  pub exit_time:       Option<DateTime<Utc>>,
}

impl Visit {
  pub fn is_open(&self) -> bool { self.exit_time.is_none() }
}

#[derive(Debug, Clone)]
pub struct NewVisit {
  pub student_id:      Id,
  pub active_group_id: Id,
  pub entry_time:      DateTime<Utc>,
}

// ─── Supervisions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervision {
  pub id:              Id,
  pub staff_id:        Id,
  pub active_group_id: Id,
  pub start_time:      DateTime<Utc>,
  pub end_time:        Option<DateTime<Utc>>,
}

// ─── Scheduled checkouts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduledCheckoutStatus {
  Pending,
  Cancelled,
  Executed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledCheckout {
  pub id:            Id,
  pub student_id:    Id,
  pub scheduled_by:  Id,
  pub scheduled_for: DateTime<Utc>,
  pub reason:        Option<String>,
  pub status:        ScheduledCheckoutStatus,
  pub cancelled_by:  Option<Id>,
  pub cancelled_at:  Option<DateTime<Utc>>,
  pub executed_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewScheduledCheckout {
  pub student_id:    Id,
  pub scheduled_by:  Id,
  pub scheduled_for: DateTime<Utc>,
  pub reason:        Option<String>,
}

// ─── Attendance ──────────────────────────────────────────────────────────────

/// A student's presence record for one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
  pub student_id:     Id,
  pub date:           NaiveDate,
  pub check_in_time:  DateTime<Utc>,
  pub check_out_time: Option<DateTime<Utc>>,
}

/// Day-level status derived from an [`Attendance`] row (or its absence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceStatus {
  NotArrived,
  Present { since: DateTime<Utc> },
  Left { at: DateTime<Utc> },
}

impl From<Option<&Attendance>> for AttendanceStatus {
  fn from(a: Option<&Attendance>) -> Self {
    match a {
      None => Self::NotArrived,
      Some(a) => match a.check_out_time {
        Some(at) => Self::Left { at },
        None => Self::Present { since: a.check_in_time },
      },
    }
  }
}
