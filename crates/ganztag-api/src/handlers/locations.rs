//! `GET /api/students/locations?ids=1,2,3`

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use chrono::Utc;
use ganztag_core::{
  Id,
  location::{StudentLocation, resolve_student_locations},
  store::ActiveStore,
};
use serde::Deserialize;

use crate::{
  AppState,
  auth::StaffIdentity,
  error::ApiError,
  extract::{ApiQuery, Envelope, success},
};

pub const MAX_IDS: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LocationParams {
  pub ids: String,
}

/// Parse a comma-separated id list, dropping duplicates.
pub fn parse_ids(raw: &str) -> Result<Vec<Id>, ApiError> {
  let mut ids = raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|s| s.parse::<Id>().map_err(|_| ApiError::BadRequest(format!("invalid student id: {s}"))))
    .collect::<Result<Vec<_>, _>>()?;
  ids.sort_unstable();
  ids.dedup();

  if ids.is_empty() {
    return Err(ApiError::BadRequest("ids must name at least one student".into()));
  }
  if ids.len() > MAX_IDS {
    return Err(ApiError::BadRequest(format!("at most {MAX_IDS} ids per request")));
  }
  Ok(ids)
}

pub async fn list<S>(
  State(state): State<AppState<S>>,
  _staff: StaffIdentity,
  ApiQuery(params): ApiQuery<LocationParams>,
) -> Result<Json<Envelope<BTreeMap<Id, StudentLocation>>>, ApiError>
where
  S: ActiveStore + 'static,
{
  let ids = parse_ids(&params.ids)?;
  let date = state.policy.local_date(Utc::now());
  let locations = state
    .store
    .read(move |tx| resolve_student_locations(tx, &ids, date))
    .await
    .map_err(ApiError::from_classified)?;
  Ok(success(locations))
}
