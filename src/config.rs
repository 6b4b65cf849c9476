//! Process configuration (flags with env fallbacks) and the optional TOML
//! feedback configuration (prompt templates + retry policy).
//!
//! See `FeedbackConfig` and `Prompts` for the expected TOML schema.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use crate::data::PoolSettings;

#[derive(Clone, Parser)]
#[command(name = "infoeval-backend", version, about = "Scenario, session and AI feedback API")]
pub struct Config {
  /// API server port
  #[arg(long, env = "PORT", default_value_t = 9000)]
  pub port: u16,

  /// PostgreSQL DSN
  #[arg(long, env = "DATABASE_URL")]
  pub db_dsn: String,

  #[arg(long, env = "DB_MAX_OPEN_CONNS", default_value_t = 50)]
  pub db_max_open_conns: u32,

  /// Idle connections older than this are evicted
  #[arg(long, env = "DB_MAX_IDLE_TIME_SECS", default_value_t = 900)]
  pub db_max_idle_time_secs: u64,

  /// HMAC secret for authentication tokens
  #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
  pub jwt_secret: String,

  /// Trusted CORS origins (space separated)
  #[arg(long, env = "CORS_TRUSTED_ORIGINS", value_delimiter = ' ', num_args = 0..)]
  pub cors_trusted_origins: Vec<String>,

  /// TOML file with feedback prompts and retry policy
  #[arg(long, env = "FEEDBACK_CONFIG_PATH")]
  pub feedback_config: Option<PathBuf>,

  /// How long shutdown waits for in-flight feedback jobs
  #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 30)]
  pub shutdown_grace_secs: u64,
}

impl Config {
  pub fn pool_settings(&self) -> PoolSettings {
    PoolSettings {
      dsn: self.db_dsn.clone(),
      max_open_conns: self.db_max_open_conns,
      max_idle_time: Duration::from_secs(self.db_max_idle_time_secs),
    }
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_secs(self.shutdown_grace_secs)
  }

  pub fn trusted_origins(&self) -> impl Iterator<Item = &str> {
    self.cors_trusted_origins.iter().map(|o| o.trim()).filter(|o| !o.is_empty())
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FeedbackConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub retry: RetrySettings,
}

/// Prompt fragments for free-text feedback. Placeholders: `{question}`,
/// `{guidance}`, `{answer}`, `{language}`. The guidance line is only
/// included when the question carries non-empty guidance.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub question_template: String,
  pub guidance_template: String,
  pub answer_template: String,
  pub instruction_template: String,
  pub language: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      question_template: "The student was asked the following question: \"{question}\"\n".into(),
      guidance_template: "Consider the following guidance when evaluating the answer: \"{guidance}\"\n".into(),
      answer_template: "The student's answer was: \"{answer}\"\n\n".into(),
      instruction_template: "You're an expert on information evaluation and sources. Provide concise, constructive feedback on the student's answer (1-3 sentences). Focus on clarity, accuracy, and completeness. The feedback should be encouraging and help the student understand how to improve or what they did well. The feedback should also be in {language}".into(),
      language: "Swedish".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_attempts: u32,
  pub deadline_secs: u64,
  pub backoff_step_secs: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self { max_attempts: 2, deadline_secs: 60, backoff_step_secs: 2 }
  }
}

/// Load `FeedbackConfig` from `path`. No path means defaults; on any
/// parsing/IO error the failure is logged and defaults are used.
pub fn load_feedback_config(path: Option<&Path>) -> FeedbackConfig {
  let Some(path) = path else {
    info!(target: "infoeval_backend", "No feedback config path; using built-in prompts");
    return FeedbackConfig::default();
  };
  let shown = path.display();
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<FeedbackConfig>(&s) {
      Ok(cfg) => {
        info!(target: "infoeval_backend", path = %shown, language = %cfg.prompts.language, "Loaded feedback config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "infoeval_backend", path = %shown, error = %e, "Failed to parse TOML config; using defaults");
        FeedbackConfig::default()
      }
    },
    Err(e) => {
      error!(target: "infoeval_backend", path = %shown, error = %e, "Failed to read TOML config file; using defaults");
      FeedbackConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg: FeedbackConfig = toml::from_str(
      r#"
        [prompts]
        language = "English"

        [retry]
        max_attempts = 3
      "#,
    )
    .unwrap();
    assert_eq!(cfg.prompts.language, "English");
    assert!(cfg.prompts.question_template.contains("{question}"));
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.retry.deadline_secs, 60);
    assert_eq!(cfg.retry.backoff_step_secs, 2);
  }

  #[test]
  fn unreadable_file_falls_back_to_defaults() {
    let cfg = load_feedback_config(Some(Path::new("/nonexistent/feedback.toml")));
    assert_eq!(cfg.prompts.language, "Swedish");
    assert_eq!(cfg.retry.max_attempts, 2);
  }

  #[test]
  fn flags_parse_with_defaults() {
    let cfg = Config::try_parse_from([
      "infoeval-backend",
      "--db-dsn",
      "postgres://localhost/infoeval",
      "--jwt-secret",
      "s3cret",
      "--cors-trusted-origins",
      "http://localhost:5173 https://infoeval.boukdir.se",
    ])
    .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.db_max_open_conns, 50);
    assert_eq!(cfg.pool_settings().max_idle_time, Duration::from_secs(900));
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(30));
    assert_eq!(
      cfg.trusted_origins().collect::<Vec<_>>(),
      vec!["http://localhost:5173", "https://infoeval.boukdir.se"]
    );
  }
}
