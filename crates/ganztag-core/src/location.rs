//! Resolves where a batch of students currently are.
//!
//! Uses the bulk snapshot queries of [`ActiveTx`] so the number of
//! round-trips does not grow with the number of students.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::{Id, Result, session::AttendanceStatus, store::ActiveTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentLocation {
  #[serde(flatten)]
  pub attendance:      AttendanceStatus,
  pub active_group_id: Option<Id>,
  pub room_id:         Option<Id>,
  pub room_name:       Option<String>,
}

pub fn resolve_student_locations(
  tx: &dyn ActiveTx,
  student_ids: &[Id],
  date: NaiveDate,
) -> Result<BTreeMap<Id, StudentLocation>> {
  let statuses = tx.get_students_attendance_statuses(student_ids, date)?;
  let visits = tx.get_students_current_visits(student_ids)?;

  let group_ids: Vec<Id> = visits.values().map(|v| v.active_group_id).collect();
  let groups = tx.get_active_groups_by_ids(&group_ids)?;
  let room_ids: Vec<Id> = groups.values().map(|g| g.room_id).collect();
  let rooms = tx.get_rooms_by_ids(&room_ids)?;

  let locations = student_ids
    .iter()
    .map(|&id| {
      let group = visits.get(&id).and_then(|v| groups.get(&v.active_group_id));
      let room = group.and_then(|g| rooms.get(&g.room_id));
      let location = StudentLocation {
        attendance:      statuses.get(&id).copied().unwrap_or(AttendanceStatus::NotArrived),
        active_group_id: group.map(|g| g.id),
        room_id:         room.map(|r| r.id),
        room_name:       room.map(|r| r.name.clone()),
      };
      (id, location)
    })
    .collect();

  Ok(locations)
}
