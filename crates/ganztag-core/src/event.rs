//! Real-time events emitted by domain writes.
//!
//! Every write that supervisors care about produces one [`Event`] per topic
//! it concerns. Events are routed by [`Topic`]: an active-group id rendered
//! as a string, or an educational-group key of the form `edu:<id>`. Student
//! movements go to both the active group and the student's class.
//!
//! Events are immutable once built; the hub shares them behind an `Arc`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Id;

// ─── Topic ───────────────────────────────────────────────────────────────────

/// A stream-routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
  pub const EDUCATIONAL_PREFIX: &'static str = "edu:";

  /// Topic for an active group: its id as a decimal string.
  pub fn group(active_group_id: Id) -> Self { Self(active_group_id.to_string()) }

  /// Topic for an educational group: `edu:<id>`.
  pub fn educational(group_id: Id) -> Self {
    Self(format!("{}{group_id}", Self::EDUCATIONAL_PREFIX))
  }

  pub fn is_educational(&self) -> bool {
    self.0.starts_with(Self::EDUCATIONAL_PREFIX)
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Topic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for Topic {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
  StudentCheckin,
  StudentCheckout,
  StudentTransfer,
  GroupStarted,
  GroupEnded,
  SupervisorJoined,
  SupervisorLeft,
}

impl EventKind {
  /// The SSE `event:` name.
  pub fn as_str(self) -> &'static str {
    match self {
      EventKind::StudentCheckin => "student_checkin",
      EventKind::StudentCheckout => "student_checkout",
      EventKind::StudentTransfer => "student_transfer",
      EventKind::GroupStarted => "group_started",
      EventKind::GroupEnded => "group_ended",
      EventKind::SupervisorJoined => "supervisor_joined",
      EventKind::SupervisorLeft => "supervisor_left",
    }
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Payload inputs ──────────────────────────────────────────────────────────

/// A student moving into, out of, or between rooms.
#[derive(Debug, Clone)]
pub struct StudentMovement {
  pub student_id:      Id,
  pub student_name:    String,
  pub visit_id:        Id,
  pub active_group_id: Id,
  pub room_id:         Id,
  pub room_name:       String,
  pub previous_room:   Option<String>,
  pub at:              DateTime<Utc>,
}

/// A group starting or ending in a room.
#[derive(Debug, Clone)]
pub struct GroupChange {
  pub active_group_id: Id,
  pub activity_id:     Id,
  pub room_id:         Id,
  pub room_name:       String,
  pub at:              DateTime<Utc>,
}

/// A staff member joining or leaving supervision of a group.
#[derive(Debug, Clone)]
pub struct SupervisorChange {
  pub staff_id:        Id,
  pub staff_name:      String,
  pub active_group_id: Id,
  pub room_name:       String,
  pub at:              DateTime<Utc>,
}

// ─── Event ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  #[serde(rename = "type")]
  kind:       EventKind,
  topic_key:  Topic,
  payload:    Value,
  emitted_at: DateTime<Utc>,
}

impl Event {
  pub fn new(kind: EventKind, topic_key: Topic, payload: Value, emitted_at: DateTime<Utc>) -> Self {
    Self { kind, topic_key, payload, emitted_at }
  }

  /// Build a `student_checkin`, `student_checkout` or `student_transfer`
  /// event routed to the movement's active group.
  pub fn student(kind: EventKind, m: &StudentMovement) -> Self {
    let mut payload = json!({
      "student_id":      m.student_id,
      "student_name":    m.student_name,
      "visit_id":        m.visit_id,
      "active_group_id": m.active_group_id,
      "room_id":         m.room_id,
      "room_name":       m.room_name,
      "timestamp":       m.at,
    });
    if let Some(prev) = &m.previous_room {
      payload["previous_room"] = Value::String(prev.clone());
    }
    Self::new(kind, Topic::group(m.active_group_id), payload, m.at)
  }

  pub fn group(kind: EventKind, g: &GroupChange) -> Self {
    let payload = json!({
      "active_group_id": g.active_group_id,
      "activity_id":     g.activity_id,
      "room_id":         g.room_id,
      "room_name":       g.room_name,
      "timestamp":       g.at,
    });
    Self::new(kind, Topic::group(g.active_group_id), payload, g.at)
  }

  pub fn supervisor(kind: EventKind, s: &SupervisorChange) -> Self {
    let payload = json!({
      "staff_id":        s.staff_id,
      "staff_name":      s.staff_name,
      "active_group_id": s.active_group_id,
      "room_name":       s.room_name,
      "timestamp":       s.at,
    });
    Self::new(kind, Topic::group(s.active_group_id), payload, s.at)
  }

  /// A student movement on its active-group topic, repeated on the
  /// student's educational-group topic when there is one.
  pub fn student_fanout(kind: EventKind, m: &StudentMovement, educational_group: Option<Id>) -> Vec<Self> {
    let event = Self::student(kind, m);
    match educational_group {
      Some(group_id) => {
        let edu = event.on_topic(Topic::educational(group_id));
        vec![event, edu]
      }
      None => vec![event],
    }
  }

  /// The same event routed to another topic.
  pub fn on_topic(&self, topic_key: Topic) -> Self {
    Self { topic_key, ..self.clone() }
  }

  pub fn kind(&self) -> EventKind { self.kind }

  pub fn topic_key(&self) -> &Topic { &self.topic_key }

  pub fn payload(&self) -> &Value { &self.payload }

  pub fn emitted_at(&self) -> DateTime<Utc> { self.emitted_at }
}
