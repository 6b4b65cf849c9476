//! InfoEval · scenario and feedback backend
//!
//! - Axum JSON API over PostgreSQL (sqlx)
//! - Cookie-carried HS256 tokens for instructors, anonymous token sessions for students
//! - Background Gemini feedback on free-text answers, drained on shutdown
//!
//! Important env variables (all also available as flags, see `--help`):
//!   PORT                 : u16 (default 9000)
//!   DATABASE_URL         : PostgreSQL DSN
//!   JWT_SECRET           : token signing secret
//!   CORS_TRUSTED_ORIGINS : space separated origins
//!   FEEDBACK_CONFIG_PATH : TOML with feedback prompts + retry policy
//!   GEMINI_API_KEY       : enables AI feedback if present
//!   GEMINI_BASE_URL      : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL         : default "gemini-1.5-flash-latest"
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod auth;
mod config;
mod data;
mod error;
mod feedback;
mod gemini;
mod protocol;
mod routes;
mod state;
mod telemetry;
mod util;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::Db;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // A missing .env file is fine; real deployments set the environment directly.
  let _ = dotenvy::dotenv();
  let config = Config::parse();
  telemetry::init_tracing();

  let db = Db::connect(&config.pool_settings())
    .await
    .context("connecting to the database")?;

  let state = Arc::new(AppState::new(&config, db.clone()));
  let app = build_router(state.clone(), config.trusted_origins());

  let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
  let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
  info!(target: "infoeval_backend", %addr, version = env!("CARGO_PKG_VERSION"), ai_feedback = state.feedback.ai_enabled(), "HTTP server listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;

  info!(target: "infoeval_backend", in_flight = state.feedback.in_flight(), "waiting for background feedback jobs");
  if !state.feedback.drain(config.shutdown_grace()).await {
    warn!(target: "infoeval_backend", "some feedback jobs did not finish before shutdown");
  }
  db.close().await;
  info!(target: "infoeval_backend", "stopped server");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      warn!(target: "infoeval_backend", error = %e, "failed to listen for ctrl-c");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        warn!(target: "infoeval_backend", error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!(target: "infoeval_backend", "shutting down server");
}
