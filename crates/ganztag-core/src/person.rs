//! People known to the system: students and staff, both identified by an
//! optional RFID tag.

use serde::{Deserialize, Serialize};

use crate::Id;

/// Discriminates a [`Person`] into its role-specific profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PersonKind {
  Student(StudentProfile),
  Staff(StaffProfile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
  /// The educational group (class cohort) the student belongs to.
  pub group_id:       Option<Id>,
  pub school_class:   Option<String>,
  /// Receives scheduled-checkout notifications when set.
  pub guardian_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffProfile {
  pub role:     String,
  /// argon2 PHC string; never serialised.
  #[serde(skip_serializing, default)]
  pub pin_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
  pub id:         Id,
  pub first_name: String,
  pub last_name:  String,
  pub tag_id:     Option<String>,
  #[serde(flatten)]
  pub kind:       PersonKind,
}

impl Person {
  /// `"<first> <last>"`, as shown on device displays and in events.
  pub fn display_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }

  pub fn as_student(&self) -> Option<&StudentProfile> {
    match &self.kind {
      PersonKind::Student(s) => Some(s),
      PersonKind::Staff(_) => None,
    }
  }

  pub fn as_staff(&self) -> Option<&StaffProfile> {
    match &self.kind {
      PersonKind::Staff(s) => Some(s),
      PersonKind::Student(_) => None,
    }
  }
}

/// Input for creating a person.
#[derive(Debug, Clone)]
pub struct NewPerson {
  pub first_name: String,
  pub last_name:  String,
  pub tag_id:     Option<String>,
  pub kind:       PersonKind,
}

impl NewPerson {
  pub fn student(first: &str, last: &str, tag_id: Option<&str>, group_id: Option<Id>) -> Self {
    Self {
      first_name: first.into(),
      last_name:  last.into(),
      tag_id:     tag_id.map(Into::into),
      kind:       PersonKind::Student(StudentProfile {
        group_id,
        school_class: None,
        guardian_email: None,
      }),
    }
  }

  pub fn staff(first: &str, last: &str, tag_id: Option<&str>, role: &str) -> Self {
    Self {
      first_name: first.into(),
      last_name:  last.into(),
      tag_id:     tag_id.map(Into::into),
      kind:       PersonKind::Staff(StaffProfile { role: role.into(), pin_hash: None }),
    }
  }
}

/// Normalise a raw reader UID: trim, drop `:` separators, uppercase.
///
/// Readers differ in how they print the same UID (`04:a3:2f` vs `04A32F`).
pub fn normalize_tag(raw: &str) -> String {
  raw
    .trim()
    .chars()
    .filter(|c| *c != ':' && *c != '-' && !c.is_whitespace())
    .flat_map(char::to_uppercase)
    .collect()
}
