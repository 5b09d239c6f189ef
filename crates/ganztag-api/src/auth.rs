//! Request authentication: staff bearer tokens and device API keys.
//!
//! Staff requests carry `Authorization: Bearer <jwt>` (HS256, `exp`
//! required); RFID readers carry `X-Device-Key`, which is SHA-256 hashed and
//! looked up in the device registry.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::{self, SaltString},
};
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use chrono::{Duration, Utc};
use ganztag_core::{
  Id,
  facility::{Device, DeviceStatus},
  store::ActiveStore,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{AppState, error::ApiError};

pub const DEVICE_KEY_HEADER: &str = "x-device-key";

/// JWT claims. `sub` is the staff member's person id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
  pub sub:   String,
  pub exp:   i64,
  #[serde(default)]
  pub admin: bool,
}

pub struct AuthConfig {
  encoding:             EncodingKey,
  decoding:             DecodingKey,
  validation:           Validation,
  /// Log rejected credentials and permission denials at `warn`.
  pub security_logging: bool,
}

impl AuthConfig {
  pub fn new(jwt_secret: &str, security_logging: bool) -> Self {
    Self {
      encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
      decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
      validation: Validation::new(Algorithm::HS256),
      security_logging,
    }
  }

  /// Sign a token for `staff_id` valid for `ttl`.
  pub fn issue(&self, staff_id: Id, admin: bool, ttl: Duration) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims { sub: staff_id.to_string(), exp: (Utc::now() + ttl).timestamp(), admin };
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
  }

  fn rejected(&self, parts: &Parts, reason: &str) {
    if self.security_logging {
      warn!(method = %parts.method, path = %parts.uri.path(), reason, "request rejected");
    }
  }
}

/// SHA-256 of a device API key, hex encoded, as stored in the registry.
pub fn hash_api_key(key: &str) -> String { hex::encode(Sha256::digest(key.as_bytes())) }

/// Hash a supervisor PIN into an argon2 PHC string.
pub fn hash_pin(pin: &str) -> Result<String, password_hash::Error> {
  let salt = SaltString::generate(&mut OsRng);
  Ok(Argon2::default().hash_password(pin.as_bytes(), &salt)?.to_string())
}

pub fn verify_pin(pin: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .map(|parsed| Argon2::default().verify_password(pin.as_bytes(), &parsed).is_ok())
    .unwrap_or(false)
}

// ─── Staff ───────────────────────────────────────────────────────────────────

/// An authenticated staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffIdentity {
  pub staff_id: Id,
  pub admin:    bool,
}

/// Validate the bearer token in `headers`; the error names the reason.
pub fn verify_bearer(headers: &HeaderMap, auth: &AuthConfig) -> Result<StaffIdentity, &'static str> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or("missing authorization header")?;
  let token = value.strip_prefix("Bearer ").ok_or("not a bearer token")?;

  let data = jsonwebtoken::decode::<Claims>(token.trim(), &auth.decoding, &auth.validation)
    .map_err(|_| "invalid token")?;
  let staff_id = data.claims.sub.parse().map_err(|_| "invalid subject")?;
  Ok(StaffIdentity { staff_id, admin: data.claims.admin })
}

impl<S> FromRequestParts<AppState<S>> for StaffIdentity
where
  S: ActiveStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    verify_bearer(&parts.headers, &state.auth).map_err(|reason| {
      state.auth.rejected(parts, reason);
      ApiError::Unauthorized("authentication required".into())
    })
  }
}

/// A staff member whose token carries the `admin` claim.
#[derive(Debug, Clone, Copy)]
pub struct AdminIdentity(pub StaffIdentity);

impl<S> FromRequestParts<AppState<S>> for AdminIdentity
where
  S: ActiveStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let staff = StaffIdentity::from_request_parts(parts, state).await?;
    if !staff.admin {
      state.auth.rejected(parts, "admin privileges required");
      return Err(ApiError::Forbidden("admin privileges required".into()));
    }
    Ok(AdminIdentity(staff))
  }
}

// ─── Devices ─────────────────────────────────────────────────────────────────

/// The active RFID device that sent the request.
#[derive(Debug, Clone)]
pub struct DeviceContext {
  pub device: Device,
}

impl<S> FromRequestParts<AppState<S>> for DeviceContext
where
  S: ActiveStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let Some(key) = parts
      .headers
      .get(DEVICE_KEY_HEADER)
      .and_then(|v| v.to_str().ok())
      .map(str::trim)
      .filter(|k| !k.is_empty())
    else {
      state.auth.rejected(parts, "missing device key");
      return Err(ApiError::BadRequest("device API key required".into()));
    };

    let hash = hash_api_key(key);
    let device = state
      .store
      .read(move |tx| tx.find_device_by_key_hash(&hash))
      .await
      .map_err(ApiError::from_classified)?;

    let Some(device) = device else {
      state.auth.rejected(parts, "unknown device key");
      return Err(ApiError::Unauthorized("invalid device API key".into()));
    };
    if device.status != DeviceStatus::Active {
      state.auth.rejected(parts, "inactive device");
      return Err(ApiError::Unauthorized("device is not active".into()));
    }

    let (id, now) = (device.id, Utc::now());
    if let Err(e) = state.store.transact(None, move |tx| tx.touch_device(id, now)).await {
      warn!(device_id = %device.device_id, error = %e, "failed to record device last_seen");
    }
    Ok(DeviceContext { device })
  }
}
