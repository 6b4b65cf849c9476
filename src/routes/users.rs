use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Response};
use tracing::{info, instrument};
use validator::Validate;

use crate::auth::{hash_password, AuthenticatedUser};
use crate::data::DataError;
use crate::error::ApiError;
use crate::protocol::{RegisterUserIn, UserOut};
use crate::routes::http::{write_json, StrictJson};
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
pub async fn register_user(
  State(state): State<Arc<AppState>>,
  StrictJson(body): StrictJson<RegisterUserIn>,
) -> Result<Response, ApiError> {
  body.validate()?;
  let hash = hash_password(body.password).await.map_err(ApiError::internal)?;
  let user = match state.db.insert_user(&body.email, &hash).await {
    Ok(u) => u,
    Err(DataError::DuplicateEmail) => {
      return Err(ApiError::invalid_field("email", "a user with this email already exists"))
    }
    Err(e) => return Err(e.into()),
  };
  info!(target: "infoeval_backend", user_id = %user.id, "user registered");
  Ok(write_json(StatusCode::ACCEPTED, &UserOut { user: &user }))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.id))]
pub async fn show_current_user(AuthenticatedUser(user): AuthenticatedUser) -> Response {
  write_json(StatusCode::OK, &UserOut { user: &user })
}
