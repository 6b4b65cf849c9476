//! Instructor authentication: HS256 tokens carried in the `token` cookie,
//! bcrypt password hashes, the request middleware that resolves a `Caller`,
//! and the `AuthenticatedUser` guard.

use std::sync::Arc;

use axum::{
  extract::{FromRequestParts, Request, State},
  http::request::Parts,
  middleware::Next,
  response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::data::{DataError, User};
use crate::error::ApiError;
use crate::state::AppState;

pub const TOKEN_COOKIE: &str = "token";
pub const TOKEN_ISSUER: &str = "infoeval.boukdir.se";
pub const TOKEN_TTL_HOURS: i64 = 12;
pub const BCRYPT_COST: u32 = 12;

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("token rejected: {0}")]
  Jwt(#[from] jsonwebtoken::errors::Error),
  #[error("token subject is not a user id")]
  InvalidSubject,
  #[error("stored password hash is not valid UTF-8")]
  MalformedHash,
  #[error("bcrypt: {0}")]
  Bcrypt(#[from] bcrypt::BcryptError),
  #[error("blocking task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub iat: i64,
  pub nbf: i64,
  pub exp: i64,
  pub iss: String,
  pub aud: Vec<String>,
}

pub fn issue_token(user_id: Uuid, secret: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
  let claims = Claims {
    sub: user_id.to_string(),
    iat: now.timestamp(),
    nbf: now.timestamp(),
    exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    iss: TOKEN_ISSUER.to_string(),
    aud: vec![TOKEN_ISSUER.to_string()],
  };
  Ok(encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Check signature, validity window, issuer and audience; return the subject.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, AuthError> {
  let mut validation = Validation::new(Algorithm::HS256);
  validation.leeway = 0;
  validation.validate_nbf = true;
  validation.set_issuer(&[TOKEN_ISSUER]);
  validation.set_audience(&[TOKEN_ISSUER]);
  validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

  let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
  Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)
}

pub async fn hash_password(plaintext: String) -> Result<Vec<u8>, AuthError> {
  let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, BCRYPT_COST)).await??;
  Ok(hashed.into_bytes())
}

/// `Ok(false)` on mismatch; malformed hashes and worker failures are errors.
pub async fn password_matches(plaintext: String, hash: Vec<u8>) -> Result<bool, AuthError> {
  tokio::task::spawn_blocking(move || -> Result<bool, AuthError> {
    let hash = std::str::from_utf8(&hash).map_err(|_| AuthError::MalformedHash)?;
    Ok(bcrypt::verify(plaintext, hash)?)
  })
  .await?
}

pub fn session_cookie(token: String) -> Cookie<'static> {
  Cookie::build((TOKEN_COOKIE, token))
    .path("/")
    .http_only(true)
    .secure(true)
    .same_site(SameSite::Lax)
    .max_age(time::Duration::hours(TOKEN_TTL_HOURS))
    .build()
}

pub fn cleared_cookie() -> Cookie<'static> {
  Cookie::build((TOKEN_COOKIE, ""))
    .path("/")
    .http_only(true)
    .secure(true)
    .same_site(SameSite::Lax)
    .max_age(time::Duration::ZERO)
    .expires(time::OffsetDateTime::UNIX_EPOCH)
    .build()
}

/// Who is making the request, as resolved by `authenticate`.
#[derive(Debug, Clone)]
pub enum Caller {
  Anonymous,
  Authenticated(User),
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
  type Rejection = std::convert::Infallible;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    Ok(parts.extensions.get::<Caller>().cloned().unwrap_or(Caller::Anonymous))
  }
}

/// Extractor for routes that require a logged-in instructor.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    match Caller::from_request_parts(parts, state).await {
      Ok(Caller::Authenticated(user)) => Ok(AuthenticatedUser(user)),
      _ => Err(ApiError::AuthenticationRequired),
    }
  }
}

/// Resolve the `token` cookie into a `Caller` request extension. No cookie is
/// anonymous; a cookie that fails verification or names a missing user is 401.
pub async fn authenticate(
  State(state): State<Arc<AppState>>,
  jar: CookieJar,
  mut req: Request,
  next: Next,
) -> Result<Response, ApiError> {
  let caller = match jar.get(TOKEN_COOKIE) {
    None => Caller::Anonymous,
    Some(cookie) => {
      let user_id = verify_token(cookie.value(), &state.jwt_secret).map_err(|e| {
        debug!(target: "infoeval_backend", error = %e, "token cookie rejected");
        ApiError::InvalidAuthenticationToken
      })?;
      match state.db.get_user(user_id).await {
        Ok(user) => Caller::Authenticated(user),
        Err(DataError::RecordNotFound) => return Err(ApiError::InvalidAuthenticationToken),
        Err(e) => return Err(e.into()),
      }
    }
  };
  req.extensions_mut().insert(caller);
  Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
  use super::*;

  const SECRET: &str = "test-secret-with-enough-entropy";

  #[test]
  fn token_round_trip() {
    let id = Uuid::new_v4();
    let token = issue_token(id, SECRET, Utc::now()).unwrap();
    assert_eq!(verify_token(&token, SECRET).unwrap(), id);
  }

  #[test]
  fn wrong_secret_is_rejected() {
    let token = issue_token(Uuid::new_v4(), SECRET, Utc::now()).unwrap();
    assert!(matches!(verify_token(&token, "other"), Err(AuthError::Jwt(_))));
  }

  #[test]
  fn expired_token_is_rejected() {
    let issued = Utc::now() - Duration::hours(TOKEN_TTL_HOURS + 1);
    let token = issue_token(Uuid::new_v4(), SECRET, issued).unwrap();
    assert!(verify_token(&token, SECRET).is_err());
  }

  #[test]
  fn foreign_issuer_is_rejected() {
    let now = Utc::now();
    let claims = Claims {
      sub: Uuid::new_v4().to_string(),
      iat: now.timestamp(),
      nbf: now.timestamp(),
      exp: (now + Duration::hours(1)).timestamp(),
      iss: "elsewhere.example".into(),
      aud: vec![TOKEN_ISSUER.into()],
    };
    let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    assert!(verify_token(&token, SECRET).is_err());
  }

  #[test]
  fn non_uuid_subject_is_rejected() {
    let now = Utc::now();
    let claims = Claims {
      sub: "admin".into(),
      iat: now.timestamp(),
      nbf: now.timestamp(),
      exp: (now + Duration::hours(1)).timestamp(),
      iss: TOKEN_ISSUER.into(),
      aud: vec![TOKEN_ISSUER.into()],
    };
    let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    assert!(matches!(verify_token(&token, SECRET), Err(AuthError::InvalidSubject)));
  }

  #[tokio::test]
  async fn bcrypt_hash_and_verify() {
    let hash = hash_password("pa55word".into()).await.unwrap();
    assert!(password_matches("pa55word".into(), hash.clone()).await.unwrap());
    assert!(!password_matches("wrong-password".into(), hash).await.unwrap());
  }

  #[tokio::test]
  async fn malformed_hash_is_an_error_not_a_mismatch() {
    let res = password_matches("pa55word".into(), b"not-a-bcrypt-hash".to_vec()).await;
    assert!(res.is_err());
  }

  #[test]
  fn cookies_carry_expected_attributes() {
    let c = session_cookie("abc".into());
    assert_eq!(c.name(), TOKEN_COOKIE);
    assert_eq!(c.path(), Some("/"));
    assert_eq!(c.http_only(), Some(true));
    assert_eq!(c.secure(), Some(true));
    assert_eq!(c.same_site(), Some(SameSite::Lax));
    assert_eq!(c.max_age(), Some(time::Duration::hours(12)));
    assert_eq!(cleared_cookie().value(), "");
  }
}
