//! Anonymous scenario sessions: token-bearing, time-limited access grants.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::Response,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::data::{DataError, ScenarioSession};
use crate::error::ApiError;
use crate::protocol::{CreateSessionIn, SessionOut, SessionScenarioOut};
use crate::routes::http::{parse_id, write_json, write_json_with_location, StrictJson};
use crate::state::AppState;
use crate::util::random_hex_token;

pub const DEFAULT_VALIDITY_HOURS: i64 = 24;
pub const SESSION_EXPIRED: &str = "this session has expired";

/// Session lifetime for the requested hours; zero or negative falls back to the default.
pub fn validity_duration(hours: i64) -> Duration {
  if hours > 0 {
    Duration::hours(hours)
  } else {
    Duration::hours(DEFAULT_VALIDITY_HOURS)
  }
}

pub(crate) fn ensure_active(session: &ScenarioSession, now: DateTime<Utc>) -> Result<(), ApiError> {
  if session.is_expired_at(now) {
    return Err(ApiError::Gone(SESSION_EXPIRED));
  }
  Ok(())
}

#[instrument(level = "info", skip_all, fields(user_id = %user.id, hours = body.validity_duration_hours))]
pub async fn create_session(
  State(state): State<Arc<AppState>>,
  AuthenticatedUser(user): AuthenticatedUser,
  StrictJson(body): StrictJson<CreateSessionIn>,
) -> Result<Response, ApiError> {
  let scenario_id =
    Uuid::parse_str(&body.scenario_id).map_err(|_| ApiError::BadRequest("invalid scenario_id format".into()))?;
  body.validate()?;

  let token = random_hex_token();
  let expires_at = Utc::now() + validity_duration(body.validity_duration_hours);
  let session = match state.db.create_session(&token, scenario_id, &body.notes, expires_at).await {
    Ok(s) => s,
    Err(DataError::RecordNotFound) => return Err(ApiError::invalid_field("scenario_id", "scenario does not exist")),
    Err(e) => return Err(e.into()),
  };

  info!(target: "infoeval_backend", session_id = %session.id, %scenario_id, %expires_at, "scenario session created");
  Ok(write_json_with_location(
    StatusCode::CREATED,
    &format!("/v1/sessions/{}", session.id),
    &SessionOut { scenario_session: &session },
  ))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn show_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
  let session = state.db.get_session(parse_id(&id)?).await?;
  ensure_active(&session, Utc::now())?;
  Ok(write_json(StatusCode::OK, &SessionOut { scenario_session: &session }))
}

/// Look a session up by the token handed to participants.
#[instrument(level = "info", skip_all)]
pub async fn show_session_by_token(
  State(state): State<Arc<AppState>>,
  Path(token): Path<String>,
) -> Result<Response, ApiError> {
  let session = state.db.get_session_by_token(&token).await?;
  ensure_active(&session, Utc::now())?;
  Ok(write_json(StatusCode::OK, &SessionOut { scenario_session: &session }))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn show_session_scenario(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Response, ApiError> {
  let scenario_id = state.db.scenario_id_for_session(parse_id(&id)?).await?;
  Ok(write_json(StatusCode::OK, &SessionScenarioOut { scenario_id }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validity_defaults_to_a_day() {
    assert_eq!(validity_duration(0), Duration::hours(24));
    assert_eq!(validity_duration(-5), Duration::hours(24));
    assert_eq!(validity_duration(1), Duration::hours(1));
    assert_eq!(validity_duration(72), Duration::hours(72));
  }

  #[test]
  fn one_hour_session_is_gone_after_the_hour() {
    let created = Utc::now();
    let session = ScenarioSession {
      id: Uuid::new_v4(),
      token: random_hex_token(),
      scenario_id: Uuid::new_v4(),
      notes: String::new(),
      expires_at: created + validity_duration(1),
      created_at: created,
    };
    assert!(ensure_active(&session, created + Duration::minutes(59)).is_ok());
    assert!(ensure_active(&session, created + Duration::hours(1)).is_ok());
    let err = ensure_active(&session, created + Duration::hours(1) + Duration::seconds(1)).unwrap_err();
    assert_eq!(err.status(), StatusCode::GONE);
  }
}
