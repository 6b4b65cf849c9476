//! PostgreSQL persistence for scenarios, sessions, responses and users.
//!
//! Every query runs under a short deadline (`QUERY_TIMEOUT`, or
//! `WIDE_QUERY_TIMEOUT` for scenario-wide reads) so a stuck database cannot
//! stall handlers or feedback jobs. The schema itself is owned elsewhere; this
//! module only issues parameterized CRUD statements against it.

use std::{future::Future, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use tracing::info;

mod exercises;
mod questions;
mod responses;
mod scenarios;
mod sessions;
mod users;

pub use exercises::Exercise;
pub use questions::{ExerciseQuestion, QuestionType};
pub use responses::SessionResponse;
pub use scenarios::Scenario;
pub use sessions::ScenarioSession;
pub use users::User;

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
pub const WIDE_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DataError {
  #[error("record not found")]
  RecordNotFound,
  #[error("duplicate email")]
  DuplicateEmail,
  #[error("query exceeded its {0:?} deadline")]
  Timeout(Duration),
  #[error("stored value could not be decoded: {0}")]
  Decode(String),
  #[error(transparent)]
  Sqlx(#[from] sqlx::Error),
}

/// Pool sizing and eviction knobs.
#[derive(Clone, Debug)]
pub struct PoolSettings {
  pub dsn: String,
  pub max_open_conns: u32,
  pub max_idle_time: Duration,
}

/// Handle to the shared connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Db {
  pool: PgPool,
}

impl Db {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Open the process-wide pool and make sure the database answers.
  pub async fn connect(settings: &PoolSettings) -> Result<Self, DataError> {
    let pool = PgPoolOptions::new()
      .max_connections(settings.max_open_conns)
      .idle_timeout(settings.max_idle_time)
      .acquire_timeout(PING_TIMEOUT)
      .connect(&settings.dsn)
      .await?;
    let db = Self::new(pool);
    db.ping().await?;
    info!(target: "infoeval_backend", max_open_conns = settings.max_open_conns, max_idle_time = ?settings.max_idle_time, "database connection pool established");
    Ok(db)
  }

  pub async fn ping(&self) -> Result<(), DataError> {
    with_deadline(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool)).await?;
    Ok(())
  }

  pub async fn close(&self) {
    self.pool.close().await;
  }

  pub(crate) fn pool(&self) -> &PgPool {
    &self.pool
  }
}

/// Run one query future under `limit`. `RowNotFound` becomes `RecordNotFound`.
pub(crate) async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, DataError>
where
  F: Future<Output = Result<T, sqlx::Error>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(Ok(v)) => Ok(v),
    Ok(Err(sqlx::Error::RowNotFound)) => Err(DataError::RecordNotFound),
    Ok(Err(e)) => Err(e.into()),
    Err(_) => Err(DataError::Timeout(limit)),
  }
}

/// Foreign-key violations on insert mean the referenced parent row is gone.
pub(crate) fn missing_parent_as_not_found(e: DataError) -> DataError {
  match e {
    DataError::Sqlx(sqlx::Error::Database(ref db)) if db.is_foreign_key_violation() => DataError::RecordNotFound,
    other => other,
  }
}
