//! Body and path extractors that reject with the JSON error envelope.

use axum::extract::{FromRequest, FromRequestParts};
use serde::Serialize;

use crate::error::ApiError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// `{"status":"success","data":...,"message":...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
  pub status:  &'static str,
  pub data:    T,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

pub fn success<T: Serialize>(data: T) -> axum::Json<Envelope<T>> {
  axum::Json(Envelope { status: "success", data, message: None })
}

pub fn success_with<T: Serialize>(data: T, message: impl Into<String>) -> axum::Json<Envelope<T>> {
  axum::Json(Envelope { status: "success", data, message: Some(message.into()) })
}
