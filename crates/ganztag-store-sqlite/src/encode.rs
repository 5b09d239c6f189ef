//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with fixed microsecond precision
//! and a `Z` suffix, so lexical order equals chronological order and range
//! comparisons can run in SQL. Dates are `YYYY-MM-DD`, times `HH:MM:SS`.

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use ganztag_core::{
  Error as CoreError, Id,
  facility::{Activity, Device, DeviceStatus, EducationalGroup, Room},
  person::{Person, PersonKind, StaffProfile, StudentProfile},
  session::{ActiveGroup, Attendance, ScheduledCheckout, ScheduledCheckoutStatus, Supervision, Visit},
};
use rusqlite::{ErrorCode, Row};

type Result<T> = std::result::Result<T, CoreError>;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Map a rusqlite error into the core taxonomy. Unique-constraint failures
/// become `Duplicate`; everything else is a storage failure.
pub fn db_err(e: rusqlite::Error) -> CoreError {
  match &e {
    rusqlite::Error::SqliteFailure(f, msg) if f.code == ErrorCode::ConstraintViolation => {
      CoreError::Duplicate(msg.clone().unwrap_or_else(|| e.to_string()))
    }
    _ => CoreError::Storage(e.to_string()),
  }
}

fn decode_err(what: &str, s: &str) -> CoreError {
  CoreError::Storage(format!("cannot decode {what}: {s:?}"))
}

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| decode_err("timestamp", s))
}

pub fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── NaiveDate / NaiveTime ───────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| decode_err("date", s))
}

pub fn encode_time(t: NaiveTime) -> String { t.format("%H:%M:%S").to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M:%S").map_err(|_| decode_err("time", s))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_checkout_status(s: ScheduledCheckoutStatus) -> &'static str {
  match s {
    ScheduledCheckoutStatus::Pending => "pending",
    ScheduledCheckoutStatus::Cancelled => "cancelled",
    ScheduledCheckoutStatus::Executed => "executed",
  }
}

pub fn decode_checkout_status(s: &str) -> Result<ScheduledCheckoutStatus> {
  match s {
    "pending" => Ok(ScheduledCheckoutStatus::Pending),
    "cancelled" => Ok(ScheduledCheckoutStatus::Cancelled),
    "executed" => Ok(ScheduledCheckoutStatus::Executed),
    other => Err(decode_err("checkout status", other)),
  }
}

pub fn decode_device_status(s: &str) -> Result<DeviceStatus> {
  match s {
    "active" => Ok(DeviceStatus::Active),
    "inactive" => Ok(DeviceStatus::Inactive),
    other => Err(decode_err("device status", other)),
  }
}

/// `?, ?, ?` for an `IN (...)` list of `n` parameters.
pub fn placeholders(n: usize) -> String {
  vec!["?"; n].join(", ")
}

// ─── Raw rows ────────────────────────────────────────────────────────────────
//
// Rows are read into plain structs inside the rusqlite closure and converted
// to domain types afterwards, so decoding failures surface as core errors.

pub const PERSON_COLUMNS: &str =
  "id, first_name, last_name, tag_id, kind, group_id, school_class, guardian_email, staff_role, pin_hash";

pub struct RawPerson {
  id:             Id,
  first_name:     String,
  last_name:      String,
  tag_id:         Option<String>,
  kind:           String,
  group_id:       Option<Id>,
  school_class:   Option<String>,
  guardian_email: Option<String>,
  staff_role:     Option<String>,
  pin_hash:       Option<String>,
}

impl RawPerson {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      first_name:     row.get(1)?,
      last_name:      row.get(2)?,
      tag_id:         row.get(3)?,
      kind:           row.get(4)?,
      group_id:       row.get(5)?,
      school_class:   row.get(6)?,
      guardian_email: row.get(7)?,
      staff_role:     row.get(8)?,
      pin_hash:       row.get(9)?,
    })
  }

  pub fn into_person(self) -> Result<Person> {
    let kind = match self.kind.as_str() {
      "student" => PersonKind::Student(StudentProfile {
        group_id:       self.group_id,
        school_class:   self.school_class,
        guardian_email: self.guardian_email,
      }),
      "staff" => PersonKind::Staff(StaffProfile {
        role:     self.staff_role.unwrap_or_default(),
        pin_hash: self.pin_hash,
      }),
      other => return Err(decode_err("person kind", other)),
    };
    Ok(Person {
      id: self.id,
      first_name: self.first_name,
      last_name: self.last_name,
      tag_id: self.tag_id,
      kind,
    })
  }
}

pub const ROOM_COLUMNS: &str = "id, name, building, floor, capacity, category";

pub fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
  Ok(Room {
    id:       row.get(0)?,
    name:     row.get(1)?,
    building: row.get(2)?,
    floor:    row.get(3)?,
    capacity: row.get(4)?,
    category: row.get(5)?,
  })
}

pub const ACTIVITY_COLUMNS: &str = "id, name, category, supervisor_id, is_open, max_participants";

pub fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
  Ok(Activity {
    id:               row.get(0)?,
    name:             row.get(1)?,
    category:         row.get(2)?,
    supervisor_id:    row.get(3)?,
    is_open:          row.get(4)?,
    max_participants: row.get(5)?,
  })
}

pub struct RawEducationalGroup {
  id:                  Id,
  name:                String,
  daily_checkout_time: Option<String>,
}

impl RawEducationalGroup {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { id: row.get(0)?, name: row.get(1)?, daily_checkout_time: row.get(2)? })
  }

  pub fn into_group(self) -> Result<EducationalGroup> {
    Ok(EducationalGroup {
      id:                  self.id,
      name:                self.name,
      daily_checkout_time: self.daily_checkout_time.as_deref().map(decode_time).transpose()?,
    })
  }
}

pub struct RawDevice {
  id:        Id,
  device_id: String,
  name:      Option<String>,
  status:    String,
}

impl RawDevice {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { id: row.get(0)?, device_id: row.get(1)?, name: row.get(2)?, status: row.get(3)? })
  }

  pub fn into_device(self) -> Result<Device> {
    Ok(Device {
      id:        self.id,
      device_id: self.device_id,
      name:      self.name,
      status:    decode_device_status(&self.status)?,
    })
  }
}

pub const ACTIVE_GROUP_COLUMNS: &str =
  "id, activity_id, room_id, device_id, start_time, end_time, last_activity";

pub struct RawActiveGroup {
  id:            Id,
  activity_id:   Id,
  room_id:       Id,
  device_id:     Option<Id>,
  start_time:    String,
  end_time:      Option<String>,
  last_activity: String,
}

impl RawActiveGroup {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      activity_id:   row.get(1)?,
      room_id:       row.get(2)?,
      device_id:     row.get(3)?,
      start_time:    row.get(4)?,
      end_time:      row.get(5)?,
      last_activity: row.get(6)?,
    })
  }

  pub fn into_group(self) -> Result<ActiveGroup> {
    Ok(ActiveGroup {
      id:            self.id,
      activity_id:   self.activity_id,
      room_id:       self.room_id,
      device_id:     self.device_id,
      start_time:    decode_dt(&self.start_time)?,
      end_time:      decode_opt_dt(self.end_time)?,
      last_activity: decode_dt(&self.last_activity)?,
    })
  }
}

pub const VISIT_COLUMNS: &str = "id, student_id, active_group_id, entry_time, exit_time";

pub struct RawVisit {
  id:              Id,
  student_id:      Id,
  active_group_id: Id,
  entry_time:      String,
  exit_time:       Option<String>,
}

impl RawVisit {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      student_id:      row.get(1)?,
      active_group_id: row.get(2)?,
      entry_time:      row.get(3)?,
      exit_time:       row.get(4)?,
    })
  }

  pub fn into_visit(self) -> Result<Visit> {
    Ok(Visit {
      id:              self.id,
      student_id:      self.student_id,
      active_group_id: self.active_group_id,
      entry_time:      decode_dt(&self.entry_time)?,
      exit_time:       decode_opt_dt(self.exit_time)?,
    })
  }
}

pub const SUPERVISION_COLUMNS: &str = "id, staff_id, active_group_id, start_time, end_time";

pub struct RawSupervision {
  id:              Id,
  staff_id:        Id,
  active_group_id: Id,
  start_time:      String,
  end_time:        Option<String>,
}

impl RawSupervision {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      staff_id:        row.get(1)?,
      active_group_id: row.get(2)?,
      start_time:      row.get(3)?,
      end_time:        row.get(4)?,
    })
  }

  pub fn into_supervision(self) -> Result<Supervision> {
    Ok(Supervision {
      id:              self.id,
      staff_id:        self.staff_id,
      active_group_id: self.active_group_id,
      start_time:      decode_dt(&self.start_time)?,
      end_time:        decode_opt_dt(self.end_time)?,
    })
  }
}

pub const CHECKOUT_COLUMNS: &str = "id, student_id, scheduled_by, scheduled_for, reason, status, \
                                    cancelled_by, cancelled_at, executed_at";

pub struct RawCheckout {
  id:            Id,
  student_id:    Id,
  scheduled_by:  Id,
  scheduled_for: String,
  reason:        Option<String>,
  status:        String,
  cancelled_by:  Option<Id>,
  cancelled_at:  Option<String>,
  executed_at:   Option<String>,
}

impl RawCheckout {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      student_id:    row.get(1)?,
      scheduled_by:  row.get(2)?,
      scheduled_for: row.get(3)?,
      reason:        row.get(4)?,
      status:        row.get(5)?,
      cancelled_by:  row.get(6)?,
      cancelled_at:  row.get(7)?,
      executed_at:   row.get(8)?,
    })
  }

  pub fn into_checkout(self) -> Result<ScheduledCheckout> {
    Ok(ScheduledCheckout {
      id:            self.id,
      student_id:    self.student_id,
      scheduled_by:  self.scheduled_by,
      scheduled_for: decode_dt(&self.scheduled_for)?,
      reason:        self.reason,
      status:        decode_checkout_status(&self.status)?,
      cancelled_by:  self.cancelled_by,
      cancelled_at:  decode_opt_dt(self.cancelled_at)?,
      executed_at:   decode_opt_dt(self.executed_at)?,
    })
  }
}

pub const ATTENDANCE_COLUMNS: &str = "student_id, date, check_in_time, check_out_time";

pub struct RawAttendance {
  student_id:     Id,
  date:           String,
  check_in_time:  String,
  check_out_time: Option<String>,
}

impl RawAttendance {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      student_id:     row.get(0)?,
      date:           row.get(1)?,
      check_in_time:  row.get(2)?,
      check_out_time: row.get(3)?,
    })
  }

  pub fn into_attendance(self) -> Result<Attendance> {
    Ok(Attendance {
      student_id:     self.student_id,
      date:           decode_date(&self.date)?,
      check_in_time:  decode_dt(&self.check_in_time)?,
      check_out_time: decode_opt_dt(self.check_out_time)?,
    })
  }
}
