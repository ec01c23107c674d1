use serde::{Deserialize, Serialize};

pub mod model;
pub mod paths;
pub mod team_name;
pub mod token;

pub use model::*;

// --- Staff REST bodies (room-controller) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractReq { pub puzzle_id: String, pub stage_id: String, pub piece_id: String, pub interacted: bool }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReq { pub active: bool, pub player_id: Option<String> }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameReq { pub team_name: String, pub room_id: String, pub booking_id: String }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameReq {
  // overrides the venue's configured countdown
  pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintRequestReq { pub puzzle_id: String, pub stage_id: String, pub player_id: Option<String> }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
  pub game_id: String,
  pub game: Game,
  pub phase: String,
  pub remaining_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResp { pub ok: bool, pub writes: usize, pub failures: usize }

/// Booking payload carried by the ticket QR code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload { pub booking_id: String, pub room_id: String, pub team_name: Option<String> }

// --- Live map feed (WebSocket) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded { pub game_id: String, pub outcome: SessionOutcome }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintResolved { pub request_id: String, pub state: HintRequestState }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMsg { pub code: String, pub msg: String }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerToClient {
  Map(RoomMap),
  SessionEnded(SessionEnded),
  HintResolved(HintResolved),
  Error(ErrorMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintDecision { pub request_id: String }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientToServer {
  Heartbeat(Heartbeat),
  ApproveHint(HintDecision),
  DeclineHint(HintDecision),
}
