//! Starting and ending the group bound to an RFID device.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
  Error, Id, Result,
  event::{Event, EventKind, GroupChange},
  session::{ActiveGroup, NewActiveGroup},
  store::ActiveTx,
};

/// A group started on a device, plus the events to publish.
#[derive(Debug, Clone)]
pub struct SessionStarted {
  pub group:     ActiveGroup,
  pub room_name: String,
  pub events:    Vec<Event>,
}

/// Start `activity_id` in `room_id` on `device_id`.
///
/// A group already bound to the device is ended first, so a device never
/// drives two groups. When `supervisor_id` is given that staff member starts
/// supervising the new group.
pub fn start_session(
  tx: &mut dyn ActiveTx,
  device_id: Id,
  activity_id: Id,
  room_id: Id,
  supervisor_id: Option<Id>,
  now: DateTime<Utc>,
) -> Result<SessionStarted> {
  let room = tx.get_room(room_id)?.ok_or(Error::RoomNotFound(room_id))?;
  let activity = tx.get_activity(activity_id)?.ok_or(Error::ActivityNotFound(activity_id))?;
  if let Some(staff_id) = supervisor_id {
    let person = tx.get_person(staff_id)?.ok_or(Error::StaffNotFound(staff_id))?;
    if person.as_staff().is_none() {
      return Err(Error::NotStaff(staff_id));
    }
  }

  let mut events = Vec::new();
  if tx.find_device_active_group(device_id)?.is_some() {
    events.extend(end_session(tx, device_id, now)?.events);
  }

  let id = tx.create_active_group(NewActiveGroup {
    activity_id: activity.id,
    room_id:     room.id,
    device_id:   Some(device_id),
    start_time:  now,
  })?;
  let group = tx.get_active_group(id)?.ok_or(Error::ActiveGroupNotFound(id))?;

  if let Some(staff_id) = supervisor_id {
    tx.create_supervision(staff_id, group.id, now)?;
  }

  info!(active_group_id = group.id, device_id, room_id, activity_id, "session started");
  events.push(Event::group(EventKind::GroupStarted, &GroupChange {
    active_group_id: group.id,
    activity_id:     activity.id,
    room_id:         room.id,
    room_name:       room.name.clone(),
    at:              now,
  }));

  Ok(SessionStarted { group, room_name: room.name, events })
}

#[derive(Debug, Clone)]
pub struct SessionEnded {
  pub active_group_id: Id,
  pub room_name:       String,
  pub events:          Vec<Event>,
}

/// End the group bound to `device_id`, closing its visits and supervisions.
pub fn end_session(tx: &mut dyn ActiveTx, device_id: Id, now: DateTime<Utc>) -> Result<SessionEnded> {
  let group = tx
    .find_device_active_group(device_id)?
    .ok_or(Error::NoActiveSessionForDevice)?;
  let room = tx.get_room(group.room_id)?.ok_or(Error::RoomNotFound(group.room_id))?;

  tx.end_active_group(group.id, now)?;
  info!(active_group_id = group.id, device_id, "session ended");

  let event = Event::group(EventKind::GroupEnded, &GroupChange {
    active_group_id: group.id,
    activity_id:     group.activity_id,
    room_id:         room.id,
    room_name:       room.name.clone(),
    at:              now,
  });
  Ok(SessionEnded { active_group_id: group.id, room_name: room.name, events: vec![event] })
}
