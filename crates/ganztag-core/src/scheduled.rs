//! Scheduled checkouts: creation, cancellation and execution.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
  Error, Id, Result,
  event::{Event, EventKind, StudentMovement},
  session::{NewScheduledCheckout, ScheduledCheckout, ScheduledCheckoutStatus, Visit},
  store::ActiveTx,
};

/// Schedule a future checkout. A student has at most one pending checkout.
pub fn schedule_checkout(tx: &mut dyn ActiveTx, input: NewScheduledCheckout) -> Result<ScheduledCheckout> {
  let student = tx
    .get_person(input.student_id)?
    .ok_or(Error::StudentNotFound(input.student_id))?;
  if student.as_student().is_none() {
    return Err(Error::NotAStudent(student.id));
  }
  if tx.get_pending_scheduled_checkout(student.id)?.is_some() {
    return Err(Error::ScheduledCheckoutPending(student.id));
  }
  tx.create_scheduled_checkout(input)
}

pub fn cancel_checkout(tx: &mut dyn ActiveTx, id: Id, actor_id: Id, now: DateTime<Utc>) -> Result<()> {
  let checkout = tx
    .get_scheduled_checkout(id)?
    .ok_or(Error::ScheduledCheckoutNotFound(id))?;
  if checkout.status != ScheduledCheckoutStatus::Pending {
    return Err(Error::ScheduledCheckoutNotPending(id));
  }
  tx.cancel_scheduled_checkout(id, Some(actor_id), now)
}

/// What executing a scheduled checkout did.
#[derive(Debug, Clone)]
pub struct ExecutedCheckout {
  pub checkout_id:    Id,
  pub student_id:     Id,
  pub student_name:   String,
  pub guardian_email: Option<String>,
  /// Room the student was checked out of; `None` if they were not in one.
  pub room_name:      Option<String>,
  /// Checkout events for the active group and the student's class.
  pub events:         Vec<Event>,
}

/// Execute one pending checkout: close the open visit, if any, and mark the
/// checkout executed.
pub fn execute_checkout(tx: &mut dyn ActiveTx, id: Id, now: DateTime<Utc>) -> Result<ExecutedCheckout> {
  let checkout = tx
    .get_scheduled_checkout(id)?
    .ok_or(Error::ScheduledCheckoutNotFound(id))?;
  if checkout.status != ScheduledCheckoutStatus::Pending {
    return Err(Error::ScheduledCheckoutNotPending(id));
  }
  let student = tx
    .get_person(checkout.student_id)?
    .ok_or(Error::StudentNotFound(checkout.student_id))?;
  let guardian_email = student.as_student().and_then(|s| s.guardian_email.clone());
  let class_id = student.as_student().and_then(|s| s.group_id);

  let mut room_name = None;
  let mut events = Vec::new();
  if let Some(visit) = tx.get_student_current_visit(student.id)?.filter(Visit::is_open) {
    let group = tx
      .get_active_group(visit.active_group_id)?
      .ok_or(Error::ActiveGroupNotFound(visit.active_group_id))?;
    let room = tx.get_room(group.room_id)?.ok_or(Error::RoomNotFound(group.room_id))?;
    tx.end_visit(visit.id, now)?;
    let movement = StudentMovement {
      student_id:      student.id,
      student_name:    student.display_name(),
      visit_id:        visit.id,
      active_group_id: group.id,
      room_id:         room.id,
      room_name:       room.name.clone(),
      previous_room:   None,
      at:              now,
    };
    events = Event::student_fanout(EventKind::StudentCheckout, &movement, class_id);
    room_name = Some(room.name);
  }

  tx.mark_scheduled_checkout_executed(checkout.id, now)?;
  info!(checkout_id = checkout.id, student_id = student.id, "scheduled checkout executed");

  Ok(ExecutedCheckout {
    checkout_id: checkout.id,
    student_id: student.id,
    student_name: student.display_name(),
    guardian_email,
    room_name,
    events,
  })
}
