use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_deadline, DataError, Db, Exercise, QUERY_TIMEOUT};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Scenario {
  pub id: Uuid,
  pub title: String,
  pub description: String,
  pub difficulty: i16,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[sqlx(skip)]
  pub exercises: Vec<Exercise>,
}

impl Db {
  /// Scenario with its exercises, their media, questions and question options.
  pub async fn get_scenario(&self, id: Uuid) -> Result<Scenario, DataError> {
    let mut scenario = with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, Scenario>(
        "SELECT id, title, description, difficulty, created_at, updated_at
         FROM scenarios
         WHERE id = $1",
      )
      .bind(id)
      .fetch_one(self.pool()),
    )
    .await?;

    let mut exercises = self.exercises_for_scenario(id).await?;
    for exercise in &mut exercises {
      exercise.media = self.media_for_exercise(exercise.id).await?;
      exercise.questions = self.questions_for_exercise(exercise.id).await?;
      for question in &mut exercise.questions {
        question.options = self.options_for_question(question.id).await?;
      }
    }
    scenario.exercises = exercises;
    Ok(scenario)
  }

  /// Scenario headers only; exercises are left empty.
  pub async fn list_scenarios(&self) -> Result<Vec<Scenario>, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, Scenario>(
        "SELECT id, title, description, difficulty, created_at, updated_at
         FROM scenarios
         ORDER BY created_at",
      )
      .fetch_all(self.pool()),
    )
    .await
  }

  pub async fn insert_scenario(&self, title: &str, description: &str, difficulty: i16) -> Result<Scenario, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, Scenario>(
        "INSERT INTO scenarios (title, description, difficulty)
         VALUES ($1, $2, $3)
         RETURNING id, title, description, difficulty, created_at, updated_at",
      )
      .bind(title)
      .bind(description)
      .bind(difficulty)
      .fetch_one(self.pool()),
    )
    .await
  }
}
