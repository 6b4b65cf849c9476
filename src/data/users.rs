use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{with_deadline, DataError, Db, QUERY_TIMEOUT};

const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

/// Instructor account. The bcrypt hash never leaves the process.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
  pub id: Uuid,
  pub email: String,
  #[serde(skip)]
  pub password_hash: Vec<u8>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Db {
  pub async fn insert_user(&self, email: &str, password_hash: &[u8]) -> Result<User, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, User>(
        "INSERT INTO users (email, password_hash)
         VALUES ($1, $2)
         RETURNING id, email, password_hash, created_at, updated_at",
      )
      .bind(email)
      .bind(password_hash)
      .fetch_one(self.pool()),
    )
    .await
    .map_err(|e| match e {
      DataError::Sqlx(sqlx::Error::Database(ref db)) if db.constraint() == Some(EMAIL_UNIQUE_CONSTRAINT) => {
        DataError::DuplicateEmail
      }
      other => other,
    })
  }

  pub async fn get_user(&self, id: Uuid) -> Result<User, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, User>(
        "SELECT id, email, password_hash, created_at, updated_at
         FROM users
         WHERE id = $1",
      )
      .bind(id)
      .fetch_one(self.pool()),
    )
    .await
  }

  pub async fn get_user_by_email(&self, email: &str) -> Result<User, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, User>(
        "SELECT id, email, password_hash, created_at, updated_at
         FROM users
         WHERE email = $1",
      )
      .bind(email)
      .fetch_one(self.pool()),
    )
    .await
  }
}
