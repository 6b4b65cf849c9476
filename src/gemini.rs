//! Minimal Gemini client for feedback generation.
//!
//! We only call `models/{model}:generateContent` with a single user turn and
//! read back plain text. Calls are instrumented and log model name, latency and
//! token usage (not contents). The API key travels in a header and is never logged.

use std::{future::Future, time::Instant as StdInstant};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
const TEMPERATURE: f32 = 0.1;
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum AiError {
  #[error("deadline exceeded")]
  DeadlineExceeded,
  #[error("Gemini HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("transport: {0}")]
  Transport(reqwest::Error),
  #[error("undecodable response: {0}")]
  Decode(String),
}

impl AiError {
  pub fn is_deadline_exceeded(&self) -> bool {
    matches!(self, AiError::DeadlineExceeded)
  }

  fn from_transport(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      AiError::DeadlineExceeded
    } else if e.is_decode() {
      AiError::Decode(e.to_string())
    } else {
      AiError::Transport(e.without_url())
    }
  }
}

/// Text completion capability the feedback pipeline depends on.
pub trait CompletionClient: Send + Sync + 'static {
  /// Complete `prompt`, giving up at `deadline`. An empty string means the
  /// model answered without any text.
  fn generate(&self, prompt: &str, deadline: Instant) -> impl Future<Output = Result<String, AiError>> + Send;
}

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
}

impl GeminiClient {
  pub fn new(api_key: String, base_url: String, model: String) -> Result<Self, AiError> {
    let client = reqwest::Client::builder().build().map_err(AiError::Transport)?;
    Ok(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model })
  }

  /// Construct the client if we find GEMINI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
    Self::new(api_key, base_url, model).ok()
  }

  pub fn model(&self) -> &str {
    &self.model
  }
}

impl CompletionClient for GeminiClient {
  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  async fn generate(&self, prompt: &str, deadline: Instant) -> Result<String, AiError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
      return Err(AiError::DeadlineExceeded);
    }

    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let req = GenerateContentRequest::single_turn(prompt);
    let started = StdInstant::now();

    let res = self
      .client
      .post(&url)
      .timeout(remaining)
      .header(USER_AGENT, concat!("infoeval-backend/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header(API_KEY_HEADER, &self.api_key)
      .json(&req)
      .send()
      .await
      .map_err(AiError::from_transport)?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let message = extract_gemini_error(&body).unwrap_or(body);
      warn!(status = status.as_u16(), "Gemini request rejected");
      return Err(AiError::Http { status: status.as_u16(), message });
    }

    let body: GenerateContentResponse = res.json().await.map_err(AiError::from_transport)?;
    if let Some(usage) = &body.usage_metadata {
      info!(
        prompt_tokens = ?usage.prompt_token_count,
        candidates_tokens = ?usage.candidates_token_count,
        total_tokens = ?usage.total_token_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Gemini usage"
      );
    }
    Ok(extract_text(&body))
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
  contents: Vec<ContentReq<'a>>,
  generation_config: GenerationConfig,
}

impl<'a> GenerateContentRequest<'a> {
  fn single_turn(prompt: &'a str) -> Self {
    Self {
      contents: vec![ContentReq { role: "user", parts: vec![PartReq { text: prompt }] }],
      generation_config: GenerationConfig { temperature: TEMPERATURE },
    }
  }
}

#[derive(Serialize)]
struct ContentReq<'a> { role: &'static str, parts: Vec<PartReq<'a>> }
#[derive(Serialize)]
struct PartReq<'a> { text: &'a str }
#[derive(Serialize)]
struct GenerationConfig { temperature: f32 }

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct Candidate { #[serde(default)] content: Option<ContentResp> }
#[derive(Deserialize)]
struct ContentResp { #[serde(default)] parts: Vec<PartResp> }
#[derive(Deserialize)]
struct PartResp { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)] prompt_token_count: Option<u32>,
  #[serde(default)] candidates_token_count: Option<u32>,
  #[serde(default)] total_token_count: Option<u32>,
}

/// Concatenate the text parts of every candidate. No candidates, or only
/// non-text parts, yields an empty string.
fn extract_text(resp: &GenerateContentResponse) -> String {
  resp
    .candidates
    .iter()
    .filter_map(|c| c.content.as_ref())
    .flat_map(|c| c.parts.iter())
    .filter_map(|p| p.text.as_deref())
    .collect()
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
