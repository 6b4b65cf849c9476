//! Router assembly: HTTP endpoints, authentication, CORS, panic recovery, and HTTP tracing.

use std::{any::Any, sync::Arc};

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, warn, Level};

use crate::auth::authenticate;
use crate::error::{ApiError, SERVER_ERROR_MESSAGE};
use crate::state::AppState;

pub mod health;
pub mod http;
pub mod responses;
pub mod scenarios;
pub mod sessions;
pub mod tokens;
pub mod users;

/// Build the application router with:
/// - JSON API under `/v1/...`
/// - cookie authentication resolving every request to a `Caller`
/// - CORS reflecting only trusted origins, with credentials
/// - panic recovery answering 500 JSON and closing the connection
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router<'a>(state: Arc<AppState>, trusted_origins: impl IntoIterator<Item = &'a str>) -> Router {
    Router::new()
        .route("/v1/healthcheck", get(health::healthcheck))
        // Scenarios
        .route("/v1/scenario/:id", get(scenarios::show_scenario))
        .route("/v1/scenarios", get(scenarios::list_scenarios).post(scenarios::create_scenario))
        // Sessions
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions/:id", get(sessions::show_session))
        .route("/v1/sessions/:id/scenario", get(sessions::show_session_scenario))
        .route("/v1/session-tokens/:token", get(sessions::show_session_by_token))
        // Responses
        .route(
            "/v1/sessions/:id/responses",
            get(responses::list_responses).post(responses::create_response),
        )
        .route("/v1/session-responses/:id", get(responses::show_response))
        // Users + authentication
        .route("/v1/users", post(users::register_user))
        .route("/v1/users/me", get(users::show_current_user))
        .route("/v1/authentication", post(tokens::create_authentication_token))
        .route("/v1/logout", post(tokens::remove_authentication_token))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
        .layer(cors_layer(trusted_origins))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn cors_layer<'a>(trusted_origins: impl IntoIterator<Item = &'a str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(target: "infoeval_backend", %origin, "ignoring unrepresentable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    };
    error!(target: "infoeval_backend", panic = %detail, "handler panicked");

    let mut res = http::write_json(StatusCode::INTERNAL_SERVER_ERROR, &json!({ "error": SERVER_ERROR_MESSAGE }));
    res.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
    res
}
