use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_deadline, DataError, Db, ExerciseQuestion, QUERY_TIMEOUT};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Exercise {
  pub id: Uuid,
  pub info: String,
  pub order: i16,
  #[sqlx(skip)]
  pub media: Vec<ExerciseMedia>,
  #[sqlx(skip)]
  pub questions: Vec<ExerciseQuestion>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
  Image,
  Video,
  Audio,
}

impl TryFrom<String> for MediaType {
  type Error = DataError;

  fn try_from(raw: String) -> Result<Self, Self::Error> {
    match raw.as_str() {
      "image" => Ok(MediaType::Image),
      "video" => Ok(MediaType::Video),
      "audio" => Ok(MediaType::Audio),
      other => Err(DataError::Decode(format!("unknown media type {other:?}"))),
    }
  }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExerciseMedia {
  pub id: Uuid,
  pub media_url: String,
  #[sqlx(try_from = "String")]
  pub media_type: MediaType,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Db {
  pub(crate) async fn exercises_for_scenario(&self, scenario_id: Uuid) -> Result<Vec<Exercise>, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, Exercise>(
        r#"SELECT id, info, "order", created_at, updated_at
           FROM exercises
           WHERE scenario_id = $1
           ORDER BY "order""#,
      )
      .bind(scenario_id)
      .fetch_all(self.pool()),
    )
    .await
  }

  pub(crate) async fn media_for_exercise(&self, exercise_id: Uuid) -> Result<Vec<ExerciseMedia>, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, ExerciseMedia>(
        "SELECT id, media_url, media_type::text AS media_type, created_at, updated_at
         FROM exercise_media
         WHERE exercise_id = $1",
      )
      .bind(exercise_id)
      .fetch_all(self.pool()),
    )
    .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn media_type_parses_known_tags_only() {
    assert_eq!(MediaType::try_from("video".to_string()).unwrap(), MediaType::Video);
    assert!(matches!(MediaType::try_from("hologram".to_string()), Err(DataError::Decode(_))));
  }
}
