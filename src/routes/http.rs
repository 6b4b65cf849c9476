//! JSON plumbing shared by every handler: the tab-indented response envelope,
//! a strict body extractor, and path id parsing.

use axum::{
  body::to_bytes,
  extract::{FromRequest, FromRequestParts, Path, Request},
  http::{header, request::Parts, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{error::Category, ser::PrettyFormatter, Serializer};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{ApiError, SERVER_ERROR_MESSAGE};

pub const MAX_BODY_BYTES: usize = 1_048_576;

/// Serialize `body` with tab indentation plus a trailing newline.
pub fn write_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
  match render(body) {
    Ok(bytes) => (status, [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))], bytes).into_response(),
    Err(e) => {
      error!(target: "infoeval_backend", error = %e, "response serialization failed");
      (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        format!("{{\"error\": \"{SERVER_ERROR_MESSAGE}\"}}\n"),
      )
        .into_response()
    }
  }
}

/// `write_json` plus a `Location` header pointing at the created resource.
pub fn write_json_with_location<T: Serialize>(status: StatusCode, location: &str, body: &T) -> Response {
  let mut res = write_json(status, body);
  match HeaderValue::from_str(location) {
    Ok(v) => {
      res.headers_mut().insert(header::LOCATION, v);
    }
    Err(_) => warn!(target: "infoeval_backend", %location, "location header not representable; omitted"),
  }
  res
}

fn render<T: Serialize>(body: &T) -> Result<Vec<u8>, serde_json::Error> {
  let mut buf = Vec::with_capacity(256);
  let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"\t"));
  body.serialize(&mut ser)?;
  buf.push(b'\n');
  Ok(buf)
}

/// JSON body extractor that caps the size at 1 MiB, requires exactly one
/// value, and answers every decode problem with a 400 naming the cause.
/// Unknown keys are rejected through `deny_unknown_fields` on the target type.
pub struct StrictJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for StrictJson<T>
where
  T: DeserializeOwned,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
    let bytes = to_bytes(req.into_body(), MAX_BODY_BYTES)
      .await
      .map_err(|_| ApiError::BadRequest(format!("body not allowed to be larger than {MAX_BODY_BYTES} bytes")))?;
    decode_strict(&bytes).map(StrictJson)
  }
}

pub fn decode_strict<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Err(ApiError::BadRequest("body is empty".into()));
  }

  let mut de = serde_json::Deserializer::from_slice(bytes);
  let value = T::deserialize(&mut de).map_err(describe_decode_error)?;
  de.end()
    .map_err(|_| ApiError::BadRequest("body only allowed to contain one JSON value".into()))?;
  Ok(value)
}

fn describe_decode_error(e: serde_json::Error) -> ApiError {
  let msg = match e.classify() {
    Category::Eof => "body contains badly-formed JSON".to_string(),
    Category::Syntax | Category::Io => {
      format!("body contains badly-formed JSON (at line {}, column {})", e.line(), e.column())
    }
    Category::Data => {
      let text = e.to_string();
      match unknown_field_name(&text) {
        Some(name) => format!("body contains unknown key \"{name}\""),
        None => format!("body contains incorrect JSON type (at line {}, column {})", e.line(), e.column()),
      }
    }
  };
  ApiError::BadRequest(msg)
}

// serde's message shape: "unknown field `name`, expected ..."
fn unknown_field_name(text: &str) -> Option<&str> {
  let rest = text.strip_prefix("unknown field `")?;
  rest.split('`').next()
}

/// Parse a path id; anything that is not a UUID cannot name a resource.
pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
  Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

/// Path id extractor. It only needs the request head, so it rejects a bad id
/// with 404 before any body extractor reads the payload.
pub struct PathId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for PathId
where
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let Path(raw) = Path::<String>::from_request_parts(parts, state)
      .await
      .map_err(|_| ApiError::NotFound)?;
    parse_id(&raw).map(PathId)
  }
}
