//! Admin-managed key/value settings.
//!
//! Sensitive values are encrypted with the process's [`SettingsCipher`]
//! before they reach the store and decrypted on read.
//!
//! [`SettingsCipher`]: crate::secrets::SettingsCipher

use axum::{Json, extract::State};
use ganztag_core::{Error as CoreError, store::{ActiveStore, StoredSetting}};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
  AppState,
  auth::AdminIdentity,
  error::ApiError,
  extract::{ApiJson, ApiPath, Envelope, success},
};

pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Deserialize)]
pub struct PutBody {
  pub value:     String,
  #[serde(default)]
  pub sensitive: bool,
}

#[derive(Debug, Serialize)]
pub struct SettingData {
  pub key:       String,
  pub value:     String,
  pub sensitive: bool,
}

fn check_key(key: &str) -> Result<(), ApiError> {
  let valid = !key.is_empty()
    && key.len() <= MAX_KEY_LEN
    && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
  if valid { Ok(()) } else { Err(ApiError::BadRequest(format!("invalid setting key: {key}"))) }
}

/// `GET /api/settings/{key}`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _admin: AdminIdentity,
  ApiPath(key): ApiPath<String>,
) -> Result<Json<Envelope<SettingData>>, ApiError>
where
  S: ActiveStore + 'static,
{
  check_key(&key)?;
  let lookup = key.clone();
  let stored = state
    .store
    .read(move |tx| tx.get_setting(&lookup))
    .await
    .map_err(ApiError::from_classified)?
    .ok_or(CoreError::SettingNotFound(key))?;

  let value = if stored.encrypted {
    state.cipher.decrypt(&stored.value).map_err(|e| {
      error!(key = %stored.key, error = %e, "stored setting cannot be decrypted");
      ApiError::Internal(e.to_string())
    })?
  } else {
    stored.value
  };
  Ok(success(SettingData { key: stored.key, value, sensitive: stored.encrypted }))
}

/// `PUT /api/settings/{key}`
pub async fn put<S>(
  State(state): State<AppState<S>>,
  AdminIdentity(admin): AdminIdentity,
  ApiPath(key): ApiPath<String>,
  ApiJson(body): ApiJson<PutBody>,
) -> Result<Json<Envelope<SettingData>>, ApiError>
where
  S: ActiveStore + 'static,
{
  check_key(&key)?;
  let stored_value = if body.sensitive {
    state.cipher.encrypt(&body.value).map_err(|e| ApiError::Internal(e.to_string()))?
  } else {
    body.value.clone()
  };

  let setting = StoredSetting { key: key.clone(), value: stored_value, encrypted: body.sensitive };
  state
    .store
    .transact(None, move |tx| tx.put_setting(setting))
    .await
    .map_err(ApiError::from_classified)?;

  info!(key = %key, sensitive = body.sensitive, updated_by = admin.staff_id, "setting updated");
  Ok(success(SettingData { key, value: body.value, sensitive: body.sensitive }))
}
