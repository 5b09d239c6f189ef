//! The RFID check-in state machine.
//!
//! A scan is resolved in three stages:
//!
//! 1. Identify the scanner by tag. Staff scans toggle a supervision on the
//!    device's running group and leave the state machine.
//! 2. [`decide`] maps the student's current room and the scan's target room
//!    to a [`CheckinAction`]. This step is pure.
//! 3. The action is executed against an [`ActiveTx`], producing a
//!    [`ScanOutcome`] that carries the response data and the events to publish
//!    once the transaction commits.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset as _, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
  Error, Id, Result,
  event::{
    Event, EventKind, GroupChange, StudentMovement, SupervisorChange,
  },
  facility::Room,
  person::{Person, StudentProfile, normalize_tag},
  session::{ActiveGroup, NewActiveGroup, NewVisit, Visit},
  error::CapacityScope,
  store::ActiveTx,
};

// ─── Decision ────────────────────────────────────────────────────────────────

/// What a student scan does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinAction {
  CheckIn { room_id: Id },
  CheckOut,
  Transfer { to_room_id: Id },
}

/// Decide the action for a student scan.
///
/// `current_room` is the room of the student's open visit (`None` if not
/// checked in); `target_room` is the room the device reports.
pub fn decide(current_room: Option<Id>, target_room: Option<Id>) -> Result<CheckinAction> {
  match (current_room, target_room) {
    (None, None) => Err(Error::NoRoomContext),
    (None, Some(room_id)) => Ok(CheckinAction::CheckIn { room_id }),
    (Some(_), None) => Ok(CheckinAction::CheckOut),
    (Some(p), Some(t)) if p == t => Ok(CheckinAction::CheckOut),
    (Some(_), Some(to_room_id)) => Ok(CheckinAction::Transfer { to_room_id }),
  }
}

// ─── Inputs and outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScanInput {
  pub tag_id:    String,
  pub room_id:   Option<Id>,
  /// Internal id of the authenticated device.
  pub device_id: Id,
}

/// Site-specific knobs for the state machine.
#[derive(Debug, Clone)]
pub struct CheckinPolicy {
  /// Activity used when a group is materialised in the schoolyard.
  pub schulhof_activity_name: String,
  /// Offset used to derive the local date and time of day.
  pub local_offset:           FixedOffset,
}

impl Default for CheckinPolicy {
  fn default() -> Self {
    Self {
      schulhof_activity_name: crate::facility::SCHULHOF_ROOM_NAME.into(),
      local_offset:           Utc.fix(),
    }
  }
}

impl CheckinPolicy {
  pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&self.local_offset).date_naive()
  }
}

/// The action reported to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
  CheckedIn,
  CheckedOut,
  Transferred,
  CheckedOutDaily,
}

impl ResponseAction {
  pub fn as_str(self) -> &'static str {
    match self {
      ResponseAction::CheckedIn => "checked_in",
      ResponseAction::CheckedOut => "checked_out",
      ResponseAction::Transferred => "transferred",
      ResponseAction::CheckedOutDaily => "checked_out_daily",
    }
  }
}

#[derive(Debug, Clone)]
pub struct StudentScan {
  pub student_id:    Id,
  pub student_name:  String,
  pub action:        ResponseAction,
  pub visit_id:      Id,
  pub room_name:     String,
  pub previous_room: Option<String>,
  pub processed_at:  DateTime<Utc>,
  pub message:       String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorAction {
  SupervisorJoined,
  SupervisorLeft,
}

#[derive(Debug, Clone)]
pub struct StaffScan {
  pub staff_id:        Id,
  pub staff_name:      String,
  pub action:          SupervisorAction,
  pub active_group_id: Id,
  pub room_name:       String,
  pub processed_at:    DateTime<Utc>,
  pub message:         String,
}

#[derive(Debug, Clone)]
pub enum ScanResult {
  Student(StudentScan),
  Staff(StaffScan),
}

/// Result of a committed scan plus the events to publish afterwards.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
  pub result: ScanResult,
  pub events: Vec<Event>,
}

// ─── Greetings ───────────────────────────────────────────────────────────────

pub fn greeting(action: ResponseAction, first_name: &str, from: &str, to: &str) -> String {
  match action {
    ResponseAction::CheckedIn => format!("Hallo {first_name}!"),
    ResponseAction::CheckedOut => format!("Tschüss {first_name}!"),
    ResponseAction::CheckedOutDaily => format!("Tschüss {first_name}, bis morgen!"),
    ResponseAction::Transferred => format!("Gewechselt von {from} zu {to}!"),
  }
}

// ─── Execution ───────────────────────────────────────────────────────────────

/// Where a checked-in student currently is.
struct Placement {
  visit: Visit,
  group: ActiveGroup,
  room:  Room,
}

/// Process one scan inside the caller's transaction.
pub fn process_scan(
  tx: &mut dyn ActiveTx,
  input: &ScanInput,
  policy: &CheckinPolicy,
  now: DateTime<Utc>,
) -> Result<ScanOutcome> {
  let tag = normalize_tag(&input.tag_id);
  let person = tx.find_person_by_tag(&tag)?.ok_or(Error::TagNotFound)?;

  if person.as_staff().is_some() {
    return supervisor_scan(tx, &person, input.device_id, now);
  }
  let profile = person
    .as_student()
    .cloned()
    .ok_or(Error::NotAStudent(person.id))?;

  let placement = load_placement(tx, person.id)?;
  let action = decide(placement.as_ref().map(|p| p.room.id), input.room_id)?;
  debug!(student_id = person.id, ?action, "scan decided");

  let mut events = Vec::new();
  let scan = match (action, placement) {
    (CheckinAction::CheckIn { room_id }, _) => {
      let arrival = check_in(tx, &person, room_id, input.device_id, policy, now, &mut events)?;
      let message = greeting(ResponseAction::CheckedIn, &person.first_name, "", &arrival.room.name);
      events.extend(Event::student_fanout(
        EventKind::StudentCheckin,
        &arrival.movement(&person, None, now),
        profile.group_id,
      ));
      StudentScan {
        student_id:    person.id,
        student_name:  person.display_name(),
        action:        ResponseAction::CheckedIn,
        visit_id:      arrival.visit_id,
        room_name:     arrival.room.name,
        previous_room: None,
        processed_at:  now,
        message,
      }
    }
    (CheckinAction::CheckOut, Some(from)) => {
      let daily = is_daily_checkout(tx, &profile, policy, now)?;
      check_out(tx, &person, &from, input.device_id, now)?;
      if daily {
        tx.record_attendance_check_out(person.id, policy.local_date(now), now)?;
      }
      let action = if daily { ResponseAction::CheckedOutDaily } else { ResponseAction::CheckedOut };
      let movement = StudentMovement {
        student_id:      person.id,
        student_name:    person.display_name(),
        visit_id:        from.visit.id,
        active_group_id: from.group.id,
        room_id:         from.room.id,
        room_name:       from.room.name.clone(),
        previous_room:   None,
        at:              now,
      };
      events.extend(Event::student_fanout(EventKind::StudentCheckout, &movement, profile.group_id));
      StudentScan {
        student_id:    person.id,
        student_name:  person.display_name(),
        action,
        visit_id:      from.visit.id,
        room_name:     from.room.name.clone(),
        previous_room: None,
        processed_at:  now,
        message:       greeting(action, &person.first_name, &from.room.name, ""),
      }
    }
    (CheckinAction::Transfer { to_room_id }, Some(from)) => {
      check_out(tx, &person, &from, input.device_id, now)?;
      let arrival = check_in(tx, &person, to_room_id, input.device_id, policy, now, &mut events)?;
      let previous_room = (from.room.name != arrival.room.name).then(|| from.room.name.clone());
      events.extend(Event::student_fanout(
        EventKind::StudentTransfer,
        &arrival.movement(&person, previous_room.clone(), now),
        profile.group_id,
      ));
      StudentScan {
        student_id:    person.id,
        student_name:  person.display_name(),
        action:        ResponseAction::Transferred,
        visit_id:      arrival.visit_id,
        message:       greeting(
          ResponseAction::Transferred,
          &person.first_name,
          &from.room.name,
          &arrival.room.name,
        ),
        room_name:     arrival.room.name,
        previous_room,
        processed_at:  now,
      }
    }
    // `decide` only yields CheckOut/Transfer when a placement exists.
    (CheckinAction::CheckOut | CheckinAction::Transfer { .. }, None) => {
      return Err(Error::NoRoomContext);
    }
  };

  Ok(ScanOutcome { result: ScanResult::Student(scan), events })
}

fn load_placement(tx: &dyn ActiveTx, student_id: Id) -> Result<Option<Placement>> {
  let Some(visit) = tx.get_student_current_visit(student_id)?.filter(Visit::is_open) else {
    return Ok(None);
  };
  let group = tx
    .get_active_group(visit.active_group_id)?
    .ok_or(Error::ActiveGroupNotFound(visit.active_group_id))?;
  let room = tx.get_room(group.room_id)?.ok_or(Error::RoomNotFound(group.room_id))?;
  Ok(Some(Placement { visit, group, room }))
}

fn is_daily_checkout(
  tx: &dyn ActiveTx,
  profile: &StudentProfile,
  policy: &CheckinPolicy,
  now: DateTime<Utc>,
) -> Result<bool> {
  let Some(group_id) = profile.group_id else { return Ok(false) };
  let Some(group) = tx.get_educational_group(group_id)? else { return Ok(false) };
  let Some(cutoff) = group.daily_checkout_time else { return Ok(false) };
  Ok(now.with_timezone(&policy.local_offset).time() >= cutoff)
}

fn check_out(
  tx: &mut dyn ActiveTx,
  student: &Person,
  from: &Placement,
  device_id: Id,
  now: DateTime<Utc>,
) -> Result<()> {
  tx.end_visit(from.visit.id, now)?;

  // Cancelling a pending scheduled checkout is best-effort. No person asked
  // for it, so no actor is recorded.
  match tx.get_pending_scheduled_checkout(student.id) {
    Ok(Some(pending)) => {
      if let Err(e) = tx.cancel_scheduled_checkout(pending.id, None, now) {
        warn!(student_id = student.id, checkout_id = pending.id, error = %e, "failed to cancel scheduled checkout");
      }
    }
    Ok(None) => {}
    Err(e) => warn!(student_id = student.id, error = %e, "failed to look up scheduled checkout"),
  }

  if from.group.device_id == Some(device_id) {
    tx.update_session_activity(from.group.id, now)?;
  }
  Ok(())
}

struct Arrival {
  visit_id: Id,
  group:    ActiveGroup,
  room:     Room,
}

impl Arrival {
  fn movement(&self, student: &Person, previous_room: Option<String>, at: DateTime<Utc>) -> StudentMovement {
    StudentMovement {
      student_id:      student.id,
      student_name:    student.display_name(),
      visit_id:        self.visit_id,
      active_group_id: self.group.id,
      room_id:         self.room.id,
      room_name:       self.room.name.clone(),
      previous_room,
      at,
    }
  }
}

fn check_in(
  tx: &mut dyn ActiveTx,
  student: &Person,
  room_id: Id,
  device_id: Id,
  policy: &CheckinPolicy,
  now: DateTime<Utc>,
  events: &mut Vec<Event>,
) -> Result<Arrival> {
  let room = tx.get_room(room_id)?.ok_or(Error::RoomNotFound(room_id))?;
  let groups = tx.find_active_groups_by_room(room.id)?;

  let group = match groups.as_slice() {
    [] if room.is_schulhof() => {
      let group = materialize_schulhof_group(tx, &room, policy, now)?;
      events.push(Event::group(EventKind::GroupStarted, &GroupChange {
        active_group_id: group.id,
        activity_id:     group.activity_id,
        room_id:         room.id,
        room_name:       room.name.clone(),
        at:              now,
      }));
      group
    }
    [] => return Err(Error::NoActiveGroupInRoom(room.name)),
    [first, rest @ ..] => {
      if !rest.is_empty() {
        warn!(
          room_id = room.id,
          group_ids = ?groups.iter().map(|g| g.id).collect::<Vec<_>>(),
          "multiple running groups in room; using lowest id",
        );
      }
      first.clone()
    }
  };

  enforce_capacity(tx, &room, &group)?;

  let visit_id = tx.create_visit(NewVisit {
    student_id:      student.id,
    active_group_id: group.id,
    entry_time:      now,
  })?;
  tx.record_attendance_check_in(student.id, policy.local_date(now), now)?;

  if group.device_id == Some(device_id) {
    tx.update_session_activity(group.id, now)?;
  }

  Ok(Arrival { visit_id, group, room })
}

fn materialize_schulhof_group(
  tx: &mut dyn ActiveTx,
  room: &Room,
  policy: &CheckinPolicy,
  now: DateTime<Utc>,
) -> Result<ActiveGroup> {
  let activity = tx
    .find_activity_by_name(&policy.schulhof_activity_name)?
    .ok_or_else(|| Error::SchulhofActivityMissing(policy.schulhof_activity_name.clone()))?;

  let id = tx.create_active_group(NewActiveGroup {
    activity_id: activity.id,
    room_id:     room.id,
    device_id:   None,
    start_time:  now,
  })?;
  debug!(active_group_id = id, room_id = room.id, "materialised schoolyard group");
  tx.get_active_group(id)?.ok_or(Error::ActiveGroupNotFound(id))
}

fn enforce_capacity(tx: &dyn ActiveTx, room: &Room, group: &ActiveGroup) -> Result<()> {
  if let Some(max) = room.capacity {
    let current = tx.count_open_visits_in_room(room.id)?;
    if current >= max {
      return Err(Error::CapacityExceeded {
        scope: CapacityScope::Room,
        id: room.id,
        name: room.name.clone(),
        current,
        max,
      });
    }
  }

  let activity = tx
    .get_activity(group.activity_id)?
    .ok_or(Error::ActivityNotFound(group.activity_id))?;
  if let Some(max) = activity.max_participants {
    let current = tx.count_open_visits_in_group(group.id)?;
    if current >= max {
      return Err(Error::CapacityExceeded {
        scope: CapacityScope::Activity,
        id: activity.id,
        name: activity.name,
        current,
        max,
      });
    }
  }
  Ok(())
}

// ─── Supervisor scans ────────────────────────────────────────────────────────

fn supervisor_scan(
  tx: &mut dyn ActiveTx,
  staff: &Person,
  device_id: Id,
  now: DateTime<Utc>,
) -> Result<ScanOutcome> {
  let group = tx
    .find_device_active_group(device_id)?
    .ok_or(Error::NoActiveSessionForDevice)?;
  let room = tx.get_room(group.room_id)?.ok_or(Error::RoomNotFound(group.room_id))?;

  let open = tx
    .find_staff_active_supervisions(staff.id)?
    .into_iter()
    .find(|s| s.active_group_id == group.id);

  let (action, kind, message) = match open {
    Some(supervision) => {
      tx.end_supervision(supervision.id, now)?;
      (SupervisorAction::SupervisorLeft, EventKind::SupervisorLeft, format!("Tschüss {}!", staff.first_name))
    }
    None => {
      tx.create_supervision(staff.id, group.id, now)?;
      (SupervisorAction::SupervisorJoined, EventKind::SupervisorJoined, format!("Hallo {}!", staff.first_name))
    }
  };
  tx.update_session_activity(group.id, now)?;

  let event = Event::supervisor(kind, &SupervisorChange {
    staff_id:        staff.id,
    staff_name:      staff.display_name(),
    active_group_id: group.id,
    room_name:       room.name.clone(),
    at:              now,
  });

  Ok(ScanOutcome {
    result: ScanResult::Staff(StaffScan {
      staff_id:        staff.id,
      staff_name:      staff.display_name(),
      action,
      active_group_id: group.id,
      room_name:       room.name,
      processed_at:    now,
      message,
    }),
    events: vec![event],
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn not_checked_in_without_room_fails() {
    assert!(matches!(decide(None, None), Err(Error::NoRoomContext)));
  }

  #[test]
  fn not_checked_in_with_room_checks_in() {
    assert_eq!(decide(None, Some(7)).unwrap(), CheckinAction::CheckIn { room_id: 7 });
  }

  #[test]
  fn checked_in_without_room_checks_out() {
    assert_eq!(decide(Some(7), None).unwrap(), CheckinAction::CheckOut);
  }

  #[test]
  fn same_room_toggles_out() {
    assert_eq!(decide(Some(7), Some(7)).unwrap(), CheckinAction::CheckOut);
  }

  #[test]
  fn other_room_transfers() {
    assert_eq!(decide(Some(7), Some(9)).unwrap(), CheckinAction::Transfer { to_room_id: 9 });
  }

  #[test]
  fn greetings() {
    assert_eq!(greeting(ResponseAction::CheckedIn, "Mia", "", "Aula"), "Hallo Mia!");
    assert_eq!(greeting(ResponseAction::CheckedOut, "Mia", "Aula", ""), "Tschüss Mia!");
    assert_eq!(
      greeting(ResponseAction::Transferred, "Mia", "Aula", "Werkraum"),
      "Gewechselt von Aula zu Werkraum!",
    );
  }

  #[test]
  fn local_date_respects_offset() {
    let policy = CheckinPolicy {
      local_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
      ..CheckinPolicy::default()
    };
    let late_utc = DateTime::parse_from_rfc3339("2026-03-02T23:30:00Z").unwrap().with_timezone(&Utc);
    assert_eq!(policy.local_date(late_utc), NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
  }
}
