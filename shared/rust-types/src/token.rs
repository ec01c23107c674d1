//! Local decode of staff bearer tokens. Only the payload segment is read; the
//! signature is never checked here, the backend does that on every call.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
  #[error("expected 3 token segments, found {0}")]
  Segments(usize),
  #[error("empty payload segment")]
  EmptyPayload,
  #[error("payload is not base64url: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("payload is not JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("payload is not a JSON object")]
  NotAnObject,
}

/// Claims the staff app reads out of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffClaims {
  pub role: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub company_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exp: Option<i64>,
}

/// Decodes the claim set of a `header.payload.signature` token. A leading
/// `Bearer ` is accepted.
pub fn decode_payload(token: &str) -> Result<Map<String, Value>, TokenError> {
  let token = token.trim();
  let token = token.strip_prefix("Bearer ").unwrap_or(token);
  let segments: Vec<&str> = token.split('.').collect();
  if segments.len() != 3 { return Err(TokenError::Segments(segments.len())); }
  let payload = segments[1].trim_end_matches('=');
  if payload.is_empty() { return Err(TokenError::EmptyPayload); }
  let bytes = URL_SAFE_NO_PAD.decode(payload)?;
  match serde_json::from_slice::<Value>(&bytes)? {
    Value::Object(claims) => Ok(claims),
    _ => Err(TokenError::NotAnObject),
  }
}

pub fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T, TokenError> {
  Ok(serde_json::from_value(Value::Object(decode_payload(token)?))?)
}

pub fn role_of(token: &str) -> Option<String> {
  decode_payload(token).ok()?.get("role")?.as_str().map(str::to_owned)
}
