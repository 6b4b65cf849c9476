use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use super::{missing_parent_as_not_found, with_deadline, DataError, Db, QUERY_TIMEOUT, WIDE_QUERY_TIMEOUT};

/// One submitted answer set. `ai_feedback` stays null until the background
/// feedback job writes it.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SessionResponse {
  pub id: Uuid,
  pub scenario_session_id: Uuid,
  pub submitted_at: DateTime<Utc>,
  pub raw_answers: Option<Json<Map<String, Value>>>,
  pub ai_feedback: Option<Json<BTreeMap<String, String>>>,
}

impl Db {
  pub async fn create_response(&self, session_id: Uuid, raw_answers: &Map<String, Value>) -> Result<SessionResponse, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, SessionResponse>(
        "INSERT INTO session_responses (scenario_session_id, raw_answers)
         VALUES ($1, $2)
         RETURNING id, scenario_session_id, submitted_at, raw_answers, ai_feedback",
      )
      .bind(session_id)
      .bind(Json(raw_answers))
      .fetch_one(self.pool()),
    )
    .await
    .map_err(missing_parent_as_not_found)
  }

  /// Replace the feedback blob of one response.
  pub async fn add_feedback(&self, response_id: Uuid, feedback: &BTreeMap<String, String>) -> Result<(), DataError> {
    let result = with_deadline(
      QUERY_TIMEOUT,
      sqlx::query("UPDATE session_responses SET ai_feedback = $1 WHERE id = $2")
        .bind(Json(feedback))
        .bind(response_id)
        .execute(self.pool()),
    )
    .await?;
    if result.rows_affected() == 0 {
      return Err(DataError::RecordNotFound);
    }
    Ok(())
  }

  pub async fn get_response(&self, id: Uuid) -> Result<SessionResponse, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, SessionResponse>(
        "SELECT id, scenario_session_id, submitted_at, raw_answers, ai_feedback
         FROM session_responses
         WHERE id = $1",
      )
      .bind(id)
      .fetch_one(self.pool()),
    )
    .await
  }

  /// Newest submission first.
  pub async fn responses_for_session(&self, session_id: Uuid) -> Result<Vec<SessionResponse>, DataError> {
    with_deadline(
      WIDE_QUERY_TIMEOUT,
      sqlx::query_as::<_, SessionResponse>(
        "SELECT id, scenario_session_id, submitted_at, raw_answers, ai_feedback
         FROM session_responses
         WHERE scenario_session_id = $1
         ORDER BY submitted_at DESC",
      )
      .bind(session_id)
      .fetch_all(self.pool()),
    )
    .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pending_feedback_serializes_as_null() {
    let mut answers = Map::new();
    answers.insert("q".into(), Value::Bool(true));
    let response = SessionResponse {
      id: Uuid::nil(),
      scenario_session_id: Uuid::nil(),
      submitted_at: Utc::now(),
      raw_answers: Some(Json(answers)),
      ai_feedback: None,
    };
    let v = serde_json::to_value(&response).unwrap();
    assert_eq!(v["raw_answers"]["q"], true);
    assert!(v["ai_feedback"].is_null());
  }
}
