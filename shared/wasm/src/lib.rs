use escape_shared_types::team_name;
use escape_shared_types::token;
use wasm_bindgen::prelude::*;

/// Token payload as a JSON string, `None` when the token is malformed.
#[wasm_bindgen]
pub fn decode_token(token: &str) -> Option<String> {
  token::decode_payload(token).ok().and_then(|claims| serde_json::to_string(&claims).ok())
}

#[wasm_bindgen]
pub fn token_role(token: &str) -> Option<String> { token::role_of(token) }

#[wasm_bindgen]
pub fn is_team_name_clean(name: &str) -> bool { !team_name::contains_profanity(name) }

/// Trimmed team name, or the rejection reason as the error.
#[wasm_bindgen]
pub fn validate_team_name(name: &str) -> Result<String, String> {
  team_name::validate_team_name(name).map_err(|err| err.to_string())
}
