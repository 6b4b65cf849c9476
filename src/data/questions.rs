use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_deadline, DataError, Db, QUERY_TIMEOUT, WIDE_QUERY_TIMEOUT};

/// Question kinds. Only free-text answers are graded by the AI; the other
/// kinds grade themselves through stored option correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
  FreeText,
  TrueFalse,
  MultipleChoice,
}

impl TryFrom<String> for QuestionType {
  type Error = DataError;

  fn try_from(raw: String) -> Result<Self, Self::Error> {
    match raw.as_str() {
      "free_text" => Ok(QuestionType::FreeText),
      "true_false" => Ok(QuestionType::TrueFalse),
      "multiple_choice" => Ok(QuestionType::MultipleChoice),
      other => Err(DataError::Decode(format!("unknown question type {other:?}"))),
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExerciseQuestion {
  pub id: Uuid,
  pub exercise_id: Uuid,
  #[serde(rename = "type")]
  #[sqlx(rename = "type", try_from = "String")]
  pub kind: QuestionType,
  pub question: String,
  #[sqlx(skip)]
  pub options: Vec<QuestionOption>,
  /// Extra grading context handed to the AI for free-text questions.
  pub prompt_guidance: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QuestionOption {
  pub id: Uuid,
  pub option_text: String,
  pub is_correct: bool,
  pub feedback: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Db {
  pub(crate) async fn questions_for_exercise(&self, exercise_id: Uuid) -> Result<Vec<ExerciseQuestion>, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, ExerciseQuestion>(
        "SELECT id, exercise_id, type::text AS type, question, prompt_guidance, created_at, updated_at
         FROM exercise_questions
         WHERE exercise_id = $1",
      )
      .bind(exercise_id)
      .fetch_all(self.pool()),
    )
    .await
  }

  pub(crate) async fn options_for_question(&self, question_id: Uuid) -> Result<Vec<QuestionOption>, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, QuestionOption>(
        "SELECT id, option_text, is_correct, feedback, created_at, updated_at
         FROM exercise_question_options
         WHERE exercise_question_id = $1",
      )
      .bind(question_id)
      .fetch_all(self.pool()),
    )
    .await
  }

  /// Every question of a scenario keyed by id, without options.
  pub async fn questions_by_scenario(&self, scenario_id: Uuid) -> Result<HashMap<Uuid, ExerciseQuestion>, DataError> {
    let rows = with_deadline(
      WIDE_QUERY_TIMEOUT,
      sqlx::query_as::<_, ExerciseQuestion>(
        "SELECT eq.id, eq.exercise_id, eq.type::text AS type, eq.question, eq.prompt_guidance,
                eq.created_at, eq.updated_at
         FROM exercise_questions eq
         INNER JOIN exercises e ON eq.exercise_id = e.id
         WHERE e.scenario_id = $1",
      )
      .bind(scenario_id)
      .fetch_all(self.pool()),
    )
    .await?;
    Ok(rows.into_iter().map(|q| (q.id, q)).collect())
  }
}
