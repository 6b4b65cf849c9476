//! Request and response bodies for the HTTP API (serde ready).
//! Inputs reject unknown keys; outputs wrap each payload in one named key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::data::{Scenario, ScenarioSession, SessionResponse, User};

pub const MAX_TITLE_CHARS: usize = 300;
pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_PASSWORD_CHARS: usize = 42;

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct CreateScenarioIn {
    #[validate(custom = "validate_title")]
    pub title: String,
    pub description: String,
    #[validate(custom = "validate_difficulty")]
    pub difficulty: i16,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct CreateSessionIn {
    pub scenario_id: String,
    pub notes: String,
    /// Zero or negative means "use the default lifetime".
    #[validate(range(max = 8760, message = "can't exceed 8760 hours"))]
    pub validity_duration_hours: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CreateResponseIn {
    /// Question id → answer. Values are opaque here; only the feedback job
    /// interprets them.
    pub raw_answers: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct RegisterUserIn {
    #[validate(custom = "validate_email_address")]
    pub email: String,
    #[validate(custom = "validate_password_plaintext")]
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields, default)]
pub struct LoginIn {
    #[validate(custom = "validate_email_address")]
    pub email: String,
    #[validate(custom = "validate_password_plaintext")]
    pub password: String,
}

fn failed(code: &'static str, message: &'static str) -> ValidationError {
    let mut e = ValidationError::new(code);
    e.message = Some(message.into());
    e
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(failed("required", "must be provided"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(failed("length", "can't exceed 300 chars"));
    }
    Ok(())
}

fn validate_difficulty(difficulty: i16) -> Result<(), ValidationError> {
    match difficulty {
        d if d > 5 => Err(failed("range", "must be 5 or smaller")),
        d if d < 1 => Err(failed("range", "must be 1 or bigger")),
        _ => Ok(()),
    }
}

fn validate_email_address(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(failed("required", "must be provided"));
    }
    if !validator::validate_email(email) {
        return Err(failed("email", "must be a valid email address"));
    }
    Ok(())
}

fn validate_password_plaintext(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if password.is_empty() {
        return Err(failed("required", "must be provided"));
    }
    if len < MIN_PASSWORD_CHARS {
        return Err(failed("length", "must be at least 8 characters"));
    }
    if len > MAX_PASSWORD_CHARS {
        return Err(failed("length", "can't be more than 42 characters"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ScenarioOut<'a> {
    pub scenario: &'a Scenario,
}

#[derive(Debug, Serialize)]
pub struct ScenariosOut<'a> {
    pub scenarios: &'a [Scenario],
}

#[derive(Debug, Serialize)]
pub struct SessionOut<'a> {
    pub scenario_session: &'a ScenarioSession,
}

#[derive(Debug, Serialize)]
pub struct SessionScenarioOut {
    pub scenario_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ResponseOut<'a> {
    pub session_response: &'a SessionResponse,
}

#[derive(Debug, Serialize)]
pub struct ResponsesOut<'a> {
    pub session_responses: &'a [SessionResponse],
}

#[derive(Debug, Serialize)]
pub struct UserOut<'a> {
    pub user: &'a User,
}

#[derive(Debug, Serialize)]
pub struct AuthenticatedOut {
    pub message: &'static str,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageOut {
    pub message: &'static str,
}
