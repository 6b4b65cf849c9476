//! Scenario content: public reads, instructor-only creation.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::Response,
};
use tracing::{info, instrument};
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::protocol::{CreateScenarioIn, ScenarioOut, ScenariosOut};
use crate::routes::http::{parse_id, write_json, write_json_with_location, StrictJson};
use crate::state::AppState;

/// Full scenario tree: exercises (by order) with media, questions and options.
#[instrument(level = "info", skip(state), fields(%id))]
pub async fn show_scenario(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
  let id = parse_id(&id)?;
  let scenario = state.db.get_scenario(id).await?;
  Ok(write_json(StatusCode::OK, &ScenarioOut { scenario: &scenario }))
}

#[instrument(level = "info", skip(state))]
pub async fn list_scenarios(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
  let scenarios = state.db.list_scenarios().await?;
  Ok(write_json(StatusCode::OK, &ScenariosOut { scenarios: &scenarios }))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.id, title_len = body.title.len(), difficulty = body.difficulty))]
pub async fn create_scenario(
  State(state): State<Arc<AppState>>,
  AuthenticatedUser(user): AuthenticatedUser,
  StrictJson(body): StrictJson<CreateScenarioIn>,
) -> Result<Response, ApiError> {
  body.validate()?;
  let scenario = state.db.insert_scenario(&body.title, &body.description, body.difficulty).await?;
  info!(target: "infoeval_backend", scenario_id = %scenario.id, "scenario created");
  Ok(write_json_with_location(
    StatusCode::CREATED,
    &format!("/v1/scenario/{}", scenario.id),
    &ScenarioOut { scenario: &scenario },
  ))
}
