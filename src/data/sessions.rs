use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{missing_parent_as_not_found, with_deadline, DataError, Db, QUERY_TIMEOUT};

/// Anonymous, token-bearing grant to one scenario until `expires_at`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScenarioSession {
  pub id: Uuid,
  pub token: String,
  pub scenario_id: Uuid,
  pub notes: String,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl ScenarioSession {
  /// A session is usable up to and including its expiry instant.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }
}

impl Db {
  pub async fn create_session(
    &self,
    token: &str,
    scenario_id: Uuid,
    notes: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<ScenarioSession, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, ScenarioSession>(
        "INSERT INTO scenario_sessions (token, scenario_id, notes, expires_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id, token, scenario_id, notes, expires_at, created_at",
      )
      .bind(token)
      .bind(scenario_id)
      .bind(notes)
      .bind(expires_at)
      .fetch_one(self.pool()),
    )
    .await
    .map_err(missing_parent_as_not_found)
  }

  pub async fn get_session(&self, id: Uuid) -> Result<ScenarioSession, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, ScenarioSession>(
        "SELECT id, token, scenario_id, notes, expires_at, created_at
         FROM scenario_sessions
         WHERE id = $1",
      )
      .bind(id)
      .fetch_one(self.pool()),
    )
    .await
  }

  pub async fn get_session_by_token(&self, token: &str) -> Result<ScenarioSession, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_as::<_, ScenarioSession>(
        "SELECT id, token, scenario_id, notes, expires_at, created_at
         FROM scenario_sessions
         WHERE token = $1",
      )
      .bind(token)
      .fetch_one(self.pool()),
    )
    .await
  }

  pub async fn scenario_id_for_session(&self, id: Uuid) -> Result<Uuid, DataError> {
    with_deadline(
      QUERY_TIMEOUT,
      sqlx::query_scalar::<_, Uuid>("SELECT scenario_id FROM scenario_sessions WHERE id = $1")
        .bind(id)
        .fetch_one(self.pool()),
    )
    .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn session_expiring(expires_at: DateTime<Utc>) -> ScenarioSession {
    ScenarioSession {
      id: Uuid::new_v4(),
      token: "00".repeat(16),
      scenario_id: Uuid::new_v4(),
      notes: String::new(),
      expires_at,
      created_at: expires_at - Duration::hours(1),
    }
  }

  #[test]
  fn expiry_instant_itself_is_still_valid() {
    let expires = Utc::now();
    let s = session_expiring(expires);
    assert!(!s.is_expired_at(expires));
    assert!(s.is_expired_at(expires + Duration::milliseconds(1)));
  }
}
