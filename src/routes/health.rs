use axum::{http::StatusCode, response::Response};
use tracing::instrument;

use crate::protocol::HealthOut;
use crate::routes::http::write_json;

#[instrument(level = "info")]
pub async fn healthcheck() -> Response {
  write_json(StatusCode::OK, &HealthOut { status: "available", version: env!("CARGO_PKG_VERSION") })
}
