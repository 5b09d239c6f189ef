//! The storage contract for room-occupancy state.
//!
//! Two traits split the contract:
//!
//! - [`ActiveTx`] is a synchronous, object-safe view of one open transaction.
//!   Domain logic (the check-in state machine, the subscription resolver) is
//!   written against `&mut dyn ActiveTx` so it can run inside a single
//!   database transaction and stays independent of the backend.
//! - [`ActiveStore`] is the async entry point. It opens a transaction, hands
//!   it to a closure, and commits only if the closure succeeds and the
//!   deadline has not passed.
//!
//! Backends implement both (e.g. `ganztag-store-sqlite`).

use std::{
  collections::HashMap,
  future::Future,
  time::Instant,
};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::{
  Id, Result,
  error::Classify,
  facility::{Activity, Device, DeviceStatus, EducationalGroup, NewActivity, NewRoom, Room},
  person::{NewPerson, Person},
  session::{
    ActiveGroup, Attendance, AttendanceStatus, NewActiveGroup, NewScheduledCheckout,
    NewVisit, ScheduledCheckout, Supervision, Visit,
  },
};

/// A stored configuration value. `encrypted` values are opaque ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSetting {
  pub key:       String,
  pub value:     String,
  pub encrypted: bool,
}

// ─── Transaction view ────────────────────────────────────────────────────────

/// Operations available inside one transaction.
///
/// Implementations check the transaction deadline before every statement and
/// fail with [`Error::DeadlineExceeded`](crate::Error::DeadlineExceeded) once
/// it has passed. Any error aborts the whole transaction.
pub trait ActiveTx {
  // ── People ────────────────────────────────────────────────────────────

  /// Look up a person by normalised RFID tag.
  fn find_person_by_tag(&self, tag_id: &str) -> Result<Option<Person>>;

  fn get_person(&self, id: Id) -> Result<Option<Person>>;

  /// Persist a person; the tag is normalised before storage.
  /// Fails with `Duplicate` if the tag is already assigned.
  fn create_person(&mut self, person: NewPerson) -> Result<Person>;

  fn set_staff_pin_hash(&mut self, staff_id: Id, pin_hash: &str) -> Result<()>;

  // ── Rooms, activities, educational groups ─────────────────────────────

  fn get_room(&self, id: Id) -> Result<Option<Room>>;

  /// Fails with `Duplicate` if the name is taken.
  fn create_room(&mut self, room: NewRoom) -> Result<Room>;

  fn get_activity(&self, id: Id) -> Result<Option<Activity>>;

  fn find_activity_by_name(&self, name: &str) -> Result<Option<Activity>>;

  fn create_activity(&mut self, activity: NewActivity) -> Result<Activity>;

  fn get_educational_group(&self, id: Id) -> Result<Option<EducationalGroup>>;

  fn create_educational_group(
    &mut self,
    name: &str,
    daily_checkout_time: Option<NaiveTime>,
  ) -> Result<EducationalGroup>;

  fn assign_staff_to_educational_group(&mut self, staff_id: Id, group_id: Id) -> Result<()>;

  /// Ids of the educational groups a staff member is assigned to, ascending.
  fn find_staff_educational_group_ids(&self, staff_id: Id) -> Result<Vec<Id>>;

  // ── Devices ───────────────────────────────────────────────────────────

  fn find_device_by_key_hash(&self, api_key_hash: &str) -> Result<Option<Device>>;

  fn create_device(&mut self, device_id: &str, name: Option<&str>, api_key_hash: &str) -> Result<Device>;

  fn touch_device(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  fn set_device_status(&mut self, id: Id, status: DeviceStatus) -> Result<()>;

  // ── Active groups ─────────────────────────────────────────────────────

  fn get_active_group(&self, id: Id) -> Result<Option<ActiveGroup>>;

  /// Running groups in a room, ordered by ascending id.
  fn find_active_groups_by_room(&self, room_id: Id) -> Result<Vec<ActiveGroup>>;

  /// The running group bound to a device, if any.
  fn find_device_active_group(&self, device_id: Id) -> Result<Option<ActiveGroup>>;

  fn create_active_group(&mut self, group: NewActiveGroup) -> Result<Id>;

  /// Set `end_time` and close every open visit and supervision in the group.
  /// Fails with `ActiveGroupAlreadyEnded` if the group is not running.
  fn end_active_group(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  /// Touch `last_activity`.
  fn update_session_activity(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  fn count_open_visits_in_room(&self, room_id: Id) -> Result<u32>;

  fn count_open_visits_in_group(&self, active_group_id: Id) -> Result<u32>;

  // ── Visits ────────────────────────────────────────────────────────────

  /// The student's most recent visit, open or not.
  fn get_student_current_visit(&self, student_id: Id) -> Result<Option<Visit>>;

  fn create_visit(&mut self, visit: NewVisit) -> Result<Id>;

  /// Set `exit_time`. Fails with `VisitAlreadyEnded` if it is already set.
  fn end_visit(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  // ── Supervisions ──────────────────────────────────────────────────────

  /// Open supervisions held by a staff member, ordered by active group id.
  fn find_staff_active_supervisions(&self, staff_id: Id) -> Result<Vec<Supervision>>;

  fn create_supervision(&mut self, staff_id: Id, active_group_id: Id, at: DateTime<Utc>) -> Result<Supervision>;

  fn end_supervision(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  // ── Scheduled checkouts ───────────────────────────────────────────────

  fn get_scheduled_checkout(&self, id: Id) -> Result<Option<ScheduledCheckout>>;

  fn get_pending_scheduled_checkout(&self, student_id: Id) -> Result<Option<ScheduledCheckout>>;

  fn create_scheduled_checkout(&mut self, checkout: NewScheduledCheckout) -> Result<ScheduledCheckout>;

  /// `actor_id` is `None` when the system cancels, e.g. on a manual checkout.
  fn cancel_scheduled_checkout(&mut self, id: Id, actor_id: Option<Id>, at: DateTime<Utc>) -> Result<()>;

  /// Pending checkouts with `scheduled_for <= now`, oldest first.
  fn find_due_scheduled_checkouts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledCheckout>>;

  fn mark_scheduled_checkout_executed(&mut self, id: Id, at: DateTime<Utc>) -> Result<()>;

  // ── Attendance ────────────────────────────────────────────────────────

  fn get_attendance(&self, student_id: Id, date: NaiveDate) -> Result<Option<Attendance>>;

  /// Create the day's attendance row if it does not exist yet.
  fn record_attendance_check_in(&mut self, student_id: Id, date: NaiveDate, at: DateTime<Utc>) -> Result<()>;

  fn record_attendance_check_out(&mut self, student_id: Id, date: NaiveDate, at: DateTime<Utc>) -> Result<()>;

  // ── Bulk snapshots (one query each) ───────────────────────────────────

  fn get_students_attendance_statuses(&self, student_ids: &[Id], date: NaiveDate) -> Result<HashMap<Id, AttendanceStatus>>;

  /// Open visits only, keyed by student id.
  fn get_students_current_visits(&self, student_ids: &[Id]) -> Result<HashMap<Id, Visit>>;

  fn get_active_groups_by_ids(&self, ids: &[Id]) -> Result<HashMap<Id, ActiveGroup>>;

  fn get_rooms_by_ids(&self, ids: &[Id]) -> Result<HashMap<Id, Room>>;

  // ── Settings ──────────────────────────────────────────────────────────

  fn get_setting(&self, key: &str) -> Result<Option<StoredSetting>>;

  fn put_setting(&mut self, setting: StoredSetting) -> Result<()>;
}

// ─── Async entry point ───────────────────────────────────────────────────────

/// Abstraction over an occupancy-state backend.
///
/// All methods return `Send` futures so the trait can be used from axum
/// handlers on a multi-threaded runtime.
pub trait ActiveStore: Send + Sync {
  type Error: std::error::Error + Classify + From<crate::Error> + Send + Sync + 'static;

  /// Run `f` inside one transaction and commit if it returns `Ok`.
  ///
  /// When `deadline` passes before commit the transaction is rolled back and
  /// the call fails with `DeadlineExceeded`. Calls are serialised by the
  /// backend, so two scans of the same tag never interleave.
  fn transact<T, F>(
    &self,
    deadline: Option<Instant>,
    f: F,
  ) -> impl Future<Output = Result<T, Self::Error>> + Send + '_
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn ActiveTx) -> Result<T> + Send + 'static;

  /// Run `f` against a consistent snapshot; nothing is ever committed.
  fn read<T, F>(&self, f: F) -> impl Future<Output = Result<T, Self::Error>> + Send + '_
  where
    T: Send + 'static,
    F: FnOnce(&dyn ActiveTx) -> Result<T> + Send + 'static;
}
