//! Answer submissions. Creating one kicks off background AI feedback; the
//! submitter gets the stored row back immediately with `ai_feedback: null`.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::Response,
};
use chrono::Utc;
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::feedback::FeedbackJob;
use crate::protocol::{CreateResponseIn, ResponseOut, ResponsesOut};
use crate::routes::http::{parse_id, write_json, write_json_with_location, PathId, StrictJson};
use crate::routes::sessions::ensure_active;
use crate::state::AppState;

#[instrument(level = "info", skip(state, body), fields(session_id = %id, answers = body.raw_answers.len()))]
pub async fn create_response(
  State(state): State<Arc<AppState>>,
  PathId(id): PathId,
  StrictJson(body): StrictJson<CreateResponseIn>,
) -> Result<Response, ApiError> {
  let session = state.db.get_session(id).await?;
  ensure_active(&session, Utc::now())?;

  let response = state.db.create_response(session.id, &body.raw_answers).await?;
  state.feedback.dispatch(FeedbackJob {
    response_id: response.id,
    session_id: session.id,
    raw_answers: body.raw_answers,
  });
  info!(
    target: "infoeval_backend",
    response_id = %response.id,
    jobs_in_flight = state.feedback.in_flight(),
    "response stored; feedback dispatched"
  );

  Ok(write_json_with_location(
    StatusCode::CREATED,
    &format!("/v1/sessions/{}/responses/{}", session.id, response.id),
    &ResponseOut { session_response: &response },
  ))
}

/// Every submission of one session, newest first.
#[instrument(level = "info", skip(state), fields(session_id = %id))]
pub async fn list_responses(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
  let session = state.db.get_session(parse_id(&id)?).await?;
  let responses = state.db.responses_for_session(session.id).await?;
  Ok(write_json(StatusCode::OK, &ResponsesOut { session_responses: &responses }))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn show_response(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
  let response = state.db.get_response(parse_id(&id)?).await?;
  Ok(write_json(StatusCode::OK, &ResponseOut { session_response: &response }))
}
