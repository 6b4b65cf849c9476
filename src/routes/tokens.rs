//! Login and logout: issue or clear the `token` cookie.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Response};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use tracing::{info, instrument};
use validator::Validate;

use crate::auth::{cleared_cookie, issue_token, password_matches, session_cookie};
use crate::data::DataError;
use crate::error::ApiError;
use crate::protocol::{AuthenticatedOut, LoginIn, MessageOut};
use crate::routes::http::{write_json, StrictJson};
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
pub async fn create_authentication_token(
  State(state): State<Arc<AppState>>,
  jar: CookieJar,
  StrictJson(body): StrictJson<LoginIn>,
) -> Result<(CookieJar, Response), ApiError> {
  body.validate()?;
  let user = match state.db.get_user_by_email(&body.email).await {
    Ok(u) => u,
    Err(DataError::RecordNotFound) => return Err(ApiError::InvalidCredentials),
    Err(e) => return Err(e.into()),
  };

  let matches = password_matches(body.password, user.password_hash.clone())
    .await
    .map_err(ApiError::internal)?;
  if !matches {
    return Err(ApiError::InvalidCredentials);
  }

  let token = issue_token(user.id, &state.jwt_secret, Utc::now()).map_err(ApiError::internal)?;
  info!(target: "infoeval_backend", user_id = %user.id, "authentication token issued");
  Ok((
    jar.add(session_cookie(token)),
    write_json(StatusCode::CREATED, &AuthenticatedOut { message: "authentication successful", user_id: user.id }),
  ))
}

#[instrument(level = "info", skip_all)]
pub async fn remove_authentication_token(jar: CookieJar) -> (CookieJar, Response) {
  (
    jar.add(cleared_cookie()),
    write_json(StatusCode::OK, &MessageOut { message: "authentication cleared" }),
  )
}
