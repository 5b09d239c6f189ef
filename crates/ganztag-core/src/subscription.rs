//! Computes which topics a staff member's event stream subscribes to.

use serde::Serialize;

use crate::{Id, Result, event::Topic, store::ActiveTx};

/// The topic set for one staff member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subscriptions {
  /// Active groups the staff member currently supervises, ascending.
  pub active_group_ids:         Vec<Id>,
  /// `edu:<id>` keys of the staff member's educational groups, ascending.
  pub educational_group_topics: Vec<Topic>,
  /// Union of both, group topics first.
  pub all_topics:               Vec<Topic>,
}

impl Subscriptions {
  pub fn is_empty(&self) -> bool { self.all_topics.is_empty() }
}

/// Resolve the subscriptions of `staff_id` with two bulk lookups.
///
/// Read-only; two calls against the same snapshot return identical sets.
pub fn resolve_subscriptions(tx: &dyn ActiveTx, staff_id: Id) -> Result<Subscriptions> {
  let mut active_group_ids: Vec<Id> = tx
    .find_staff_active_supervisions(staff_id)?
    .into_iter()
    .map(|s| s.active_group_id)
    .collect();
  active_group_ids.sort_unstable();
  active_group_ids.dedup();

  let mut edu_ids = tx.find_staff_educational_group_ids(staff_id)?;
  edu_ids.sort_unstable();
  edu_ids.dedup();
  let educational_group_topics: Vec<Topic> = edu_ids.into_iter().map(Topic::educational).collect();

  let all_topics = active_group_ids
    .iter()
    .copied()
    .map(Topic::group)
    .chain(educational_group_topics.iter().cloned())
    .collect();

  Ok(Subscriptions { active_group_ids, educational_group_topics, all_topics })
}
