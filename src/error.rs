//! HTTP-facing error taxonomy.
//!
//! Every variant renders as `{"error": ...}` through the same tab-indented
//! envelope writer as successful responses. Server-side failures are logged
//! with their detail and answered with an opaque message.

use std::collections::BTreeMap;

use axum::{
  http::{header, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use validator::ValidationErrors;

use crate::data::DataError;
use crate::routes::http::write_json;

pub const NOT_FOUND_MESSAGE: &str = "the requested resource could not be found";
pub const SERVER_ERROR_MESSAGE: &str = "the server encountered a problem and could not process your request";

/// Field name → first failing rule's message.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{NOT_FOUND_MESSAGE}")]
  NotFound,
  #[error("{0}")]
  Gone(&'static str),
  #[error("failed validation")]
  FailedValidation(FieldErrors),
  #[error("invalid authentication credentials")]
  InvalidCredentials,
  #[error("invalid or missing authentication token")]
  InvalidAuthenticationToken,
  #[error("you must be authenticated to access this resource")]
  AuthenticationRequired,
  #[error(transparent)]
  Data(#[from] DataError),
  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  pub fn internal(detail: impl std::fmt::Display) -> Self {
    ApiError::Internal(detail.to_string())
  }

  /// Single-field validation failure.
  pub fn invalid_field(field: &str, message: &str) -> Self {
    ApiError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
  }

  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::NotFound | ApiError::Data(DataError::RecordNotFound) => StatusCode::NOT_FOUND,
      ApiError::Gone(_) => StatusCode::GONE,
      ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::InvalidCredentials | ApiError::InvalidAuthenticationToken | ApiError::AuthenticationRequired => {
        StatusCode::UNAUTHORIZED
      }
      ApiError::Data(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<ValidationErrors> for ApiError {
  fn from(errors: ValidationErrors) -> Self {
    let fields = errors
      .field_errors()
      .into_iter()
      .map(|(field, errs)| {
        let message = errs
          .first()
          .and_then(|e| e.message.as_ref())
          .map(|m| m.to_string())
          .unwrap_or_else(|| "is invalid".to_string());
        (field.to_string(), message)
      })
      .collect();
    ApiError::FailedValidation(fields)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = match &self {
      ApiError::FailedValidation(fields) => json!({ "error": fields }),
      ApiError::Data(DataError::RecordNotFound) => json!({ "error": NOT_FOUND_MESSAGE }),
      ApiError::Data(e) => {
        error!(target: "infoeval_backend", error = %e, "data layer failure");
        json!({ "error": SERVER_ERROR_MESSAGE })
      }
      ApiError::Internal(detail) => {
        error!(target: "infoeval_backend", error = %detail, "server error");
        json!({ "error": SERVER_ERROR_MESSAGE })
      }
      other => json!({ "error": other.to_string() }),
    };

    let mut res = write_json(status, &body);
    if matches!(self, ApiError::InvalidAuthenticationToken) {
      res.headers_mut().insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    res
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::body::to_bytes;

  async fn body_json(res: Response) -> serde_json::Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn server_errors_hide_detail() {
    let res = ApiError::internal("connection reset by peer").into_response();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(res).await["error"], SERVER_ERROR_MESSAGE);
  }

  #[tokio::test]
  async fn validation_errors_carry_field_map() {
    let res = ApiError::invalid_field("email", "a user with this email already exists").into_response();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(res).await["error"]["email"], "a user with this email already exists");
  }

  #[tokio::test]
  async fn invalid_token_sets_challenge_header() {
    let res = ApiError::InvalidAuthenticationToken.into_response();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
  }

  #[test]
  fn missing_rows_map_to_not_found() {
    assert_eq!(ApiError::from(DataError::RecordNotFound).status(), StatusCode::NOT_FOUND);
    assert_eq!(ApiError::from(DataError::DuplicateEmail).status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
