//! API error type and the `{"status":"error"}` envelope.

use std::{any::Any, fmt};

use axum::{
  Json,
  extract::rejection::{JsonRejection, PathRejection, QueryRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use ganztag_core::{Classify, ErrorKind};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  Unauthorized(String),

  #[error("{0}")]
  Forbidden(String),

  #[error("{0}")]
  NotFound(String),

  /// A domain or store error that classified itself.
  #[error("{message}")]
  Classified {
    kind:    ErrorKind,
    message: String,
    details: Option<Value>,
  },

  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  pub fn from_classified<E: Classify + fmt::Display>(e: E) -> Self {
    ApiError::Classified { kind: e.kind(), message: e.to_string(), details: e.details() }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::BadRequest(_) => ErrorKind::InvalidRequest,
      ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
      ApiError::Forbidden(_) => ErrorKind::Forbidden,
      ApiError::NotFound(_) => ErrorKind::NotFound,
      ApiError::Classified { kind, .. } => *kind,
      ApiError::Internal(_) => ErrorKind::Internal,
    }
  }

  pub fn status(&self) -> StatusCode { status_for(self.kind()) }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
    ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
    ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::Conflict => StatusCode::CONFLICT,
    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl From<ganztag_core::Error> for ApiError {
  fn from(e: ganztag_core::Error) -> Self { ApiError::from_classified(e) }
}

impl From<JsonRejection> for ApiError {
  fn from(r: JsonRejection) -> Self { ApiError::BadRequest(r.body_text()) }
}

impl From<PathRejection> for ApiError {
  fn from(r: PathRejection) -> Self { ApiError::BadRequest(r.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(r: QueryRejection) -> Self { ApiError::BadRequest(r.body_text()) }
}

fn error_body(message: &str, details: Option<Value>) -> Value {
  let mut body = json!({ "status": "error", "error": message });
  if let Some(details) = details {
    body["details"] = details;
  }
  body
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let (message, details) = match self {
      ApiError::Classified { message, details, .. } => (message, details),
      other => (other.to_string(), None),
    };

    // Server-side failures are logged in full but not echoed to the client.
    let message = if status.is_server_error() {
      error!(error = %message, "request failed");
      "internal server error".to_owned()
    } else {
      message
    };

    (status, Json(error_body(&message, details))).into_response()
  }
}

/// Response for a handler that panicked; used with `CatchPanicLayer`.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
  let detail = payload
    .downcast_ref::<&str>()
    .map(|s| (*s).to_owned())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_owned());
  error!(panic = %detail, "handler panicked");
  (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body("internal server error", None))).into_response()
}

#[cfg(test)]
mod tests {
  use ganztag_core::{Error as CoreError, error::CapacityScope};

  use super::*;

  async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn not_found_keeps_the_domain_message() {
    let response = ApiError::from(CoreError::TagNotFound).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body, json!({"status": "error", "error": "RFID tag not found"}));
  }

  #[tokio::test]
  async fn capacity_carries_details() {
    let err = CoreError::CapacityExceeded {
      scope:   CapacityScope::Activity,
      id:      3,
      name:    "Fußball".into(),
      current: 20,
      max:     20,
    };
    let response = ApiError::from(err).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["details"]["code"], "activity_capacity_exceeded");
    assert_eq!(body["details"]["activity_id"], 3);
    assert_eq!(body["details"]["current"], 20);
  }

  #[tokio::test]
  async fn internal_errors_are_not_echoed() {
    let response = ApiError::Internal("disk I/O error at page 7".into()).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "internal server error");
  }

  #[test]
  fn every_kind_has_a_status() {
    assert_eq!(status_for(ErrorKind::InvalidRequest), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
    assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
    assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
  }

  #[tokio::test]
  async fn panics_render_the_envelope() {
    let response = panic_response(Box::new("boom"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["status"], "error");
  }
}
