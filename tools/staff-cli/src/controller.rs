//! Thin HTTP client for the room controller's staff routes.

use anyhow::{anyhow, Context, Result};
use escape_shared_types::{
    CreateGameReq, ErrorMsg, GameStatus, HintRequestReq, InteractReq, ResetResp, RoomMap, SensorReq, StartGameReq,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct RoomClient {
    http: Client,
    base: String,
}

impl RoomClient {
    pub fn new(base: &str) -> Self {
        Self { http: Client::new(), base: base.trim_end_matches('/').to_string() }
    }

    /// WebSocket feed URL derived from the HTTP base.
    pub fn feed_url(&self) -> String {
        let ws = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base.clone()
        };
        format!("{ws}/ws")
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(format!("{}{path}", self.base))
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(format!("{}{path}", self.base))
    }

    pub async fn map(&self) -> Result<RoomMap> {
        call(self.get("/map"), "GET /map").await
    }

    pub async fn interact(&self, req: &InteractReq) -> Result<Value> {
        call(self.post("/pieces/interact").json(req), "POST /pieces/interact").await
    }

    pub async fn sensor(&self, name: &str, req: &SensorReq) -> Result<Value> {
        call(self.post(&format!("/sensors/{name}")).json(req), "POST /sensors").await
    }

    pub async fn reset_puzzle(&self, puzzle: &str) -> Result<ResetResp> {
        call(self.post(&format!("/puzzles/{puzzle}/reset")), "POST /puzzles/reset").await
    }

    pub async fn reset_all(&self) -> Result<ResetResp> {
        call(self.post("/admin/reset"), "POST /admin/reset").await
    }

    pub async fn create_game(&self, req: &CreateGameReq) -> Result<GameStatus> {
        call(self.post("/game").json(req), "POST /game").await
    }

    pub async fn start_game(&self, req: &StartGameReq) -> Result<GameStatus> {
        call(self.post("/game/start").json(req), "POST /game/start").await
    }

    pub async fn game(&self) -> Result<GameStatus> {
        call(self.get("/game"), "GET /game").await
    }

    pub async fn pending_hints(&self) -> Result<Vec<Value>> {
        call(self.get("/hints/pending"), "GET /hints/pending").await
    }

    pub async fn request_hint(&self, req: &HintRequestReq) -> Result<Value> {
        call(self.post("/hints/request").json(req), "POST /hints/request").await
    }

    pub async fn resolve_hint(&self, id: &str, approve: bool) -> Result<Value> {
        let verb = if approve { "approve" } else { "decline" };
        call(self.post(&format!("/hints/{id}/{verb}")), "POST /hints").await
    }
}

async fn call<T: DeserializeOwned>(req: RequestBuilder, what: &str) -> Result<T> {
    let resp = req.send().await.with_context(|| format!("{what}: controller unreachable"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ErrorMsg>(&body).map(|e| e.msg).unwrap_or(body);
        return Err(anyhow!("{what}: {status}: {reason}"));
    }
    resp.json().await.with_context(|| format!("{what}: unreadable response"))
}
