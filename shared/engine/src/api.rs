//! Client for the venue's REST backend.
//!
//! Failures are logged here and handed back to the caller, which decides
//! whether staff see an alert.

use escape_shared_types::token::{decode_claims, StaffClaims, TokenError};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ADMIN_ROLE: &str = "admin";
pub const COMPANY_ROLE: &str = "company";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("bad token: {0}")]
    Token(#[from] TokenError),
    #[error("expected a {expected} token, got {found}")]
    WrongRole { expected: &'static str, found: String },
}

/// A signed-in staff member: the raw bearer token plus its decoded claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSession {
    pub token: String,
    pub claims: StaffClaims,
}

#[derive(Debug, Deserialize)]
struct TokenResp {
    token: String,
}

#[derive(Debug, Serialize)]
struct SignInReq<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessCodeReq<'a> {
    access_code: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGame {
    pub team_name: String,
    pub room_id: String,
    pub booking_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlayer {
    pub game_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct VenueClient {
    http: Client,
    base: String,
}

impl VenueClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Admin sign-in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<StaffSession, ApiError> {
        let req = self.http.post(self.url("/api/auth/signin")).json(&SignInReq { email, password });
        let resp: TokenResp = send(req).await?;
        session_for_role(resp.token, ADMIN_ROLE)
    }

    /// Company (front desk) sign-in with a venue access code.
    pub async fn access_code(&self, code: &str) -> Result<StaffSession, ApiError> {
        let req = self.http.post(self.url("/api/auth/access-code")).json(&AccessCodeReq { access_code: code });
        let resp: TokenResp = send(req).await?;
        session_for_role(resp.token, COMPANY_ROLE)
    }

    pub async fn company(&self, session: &StaffSession, company_id: &str) -> Result<Value, ApiError> {
        send(self.http.get(self.url(&format!("/api/company/{company_id}"))).bearer_auth(&session.token)).await
    }

    pub async fn company_rooms(&self, session: &StaffSession, company_id: &str) -> Result<Value, ApiError> {
        send(self.http.get(self.url(&format!("/api/room/company/{company_id}"))).bearer_auth(&session.token)).await
    }

    pub async fn create_game(&self, session: &StaffSession, game: &NewGame) -> Result<Value, ApiError> {
        send(self.http.post(self.url("/api/game")).bearer_auth(&session.token).json(game)).await
    }

    pub async fn create_player(&self, session: &StaffSession, player: &NewPlayer) -> Result<Value, ApiError> {
        send(self.http.post(self.url("/api/player")).bearer_auth(&session.token).json(player)).await
    }
}

fn session_for_role(token: String, expected: &'static str) -> Result<StaffSession, ApiError> {
    let claims: StaffClaims = decode_claims(&token).inspect_err(|err| tracing::warn!(%err, "undecodable token"))?;
    if claims.role != expected {
        tracing::warn!(expected, found = %claims.role, "token has the wrong role");
        return Err(ApiError::WrongRole {
            expected,
            found: claims.role,
        });
    }
    Ok(StaffSession { token, claims })
}

async fn send<T: serde::de::DeserializeOwned>(req: RequestBuilder) -> Result<T, ApiError> {
    let resp = req
        .send()
        .await
        .inspect_err(|err| tracing::warn!(%err, "backend unreachable"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), %body, "backend rejected request");
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await.inspect_err(|err| tracing::warn!(%err, "backend sent an unreadable body"))?)
}
