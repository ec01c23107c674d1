//! Documents of the realtime store, as the room map sees them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PuzzleId = String;
pub type StageId = String;
pub type PieceId = String;
pub type HintId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub is_interacted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAction {
  #[serde(default)]
  pub activated: bool,
  #[serde(default)]
  pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub shared: bool,
}

/// `hints` is a nested collection in the store; it is only populated on the
/// reconstructed tree, never written as part of the stage document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
  #[serde(default)]
  pub pieces: BTreeMap<PieceId, Piece>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub action: Option<StageAction>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sensor: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(default)]
  pub solved: bool,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub hints: BTreeMap<HintId, Hint>,
}

impl Stage {
  pub fn is_interacted(&self, piece: &str) -> bool {
    self.pieces.get(piece).map(|p| p.is_interacted).unwrap_or(false)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub solved: bool,
  #[serde(default)]
  pub solution: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub stages: BTreeMap<StageId, Stage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEvent {
  pub player_id: Option<String>,
  pub action: String,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
  #[serde(rename = "type", default)]
  pub kind: String,
  #[serde(default)]
  pub active: bool,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub history: Vec<SensorEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintRequestState { Pending, Approved, Declined }

impl HintRequestState {
  pub fn is_terminal(self) -> bool { !matches!(self, HintRequestState::Pending) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintRequest {
  pub puzzle_id: PuzzleId,
  pub stage_id: StageId,
  pub state: HintRequestState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub player_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome { Escaped, TimedOut }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
  pub team_name: String,
  pub room_id: String,
  pub booking_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ended_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub outcome: Option<SessionOutcome>,
}

/// Everything the live map screen renders: the rebuilt puzzle tree plus the
/// flat sensor and hint-request collections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMap {
  pub puzzles: BTreeMap<PuzzleId, Puzzle>,
  pub sensors: BTreeMap<String, Sensor>,
  pub hint_requests: BTreeMap<String, HintRequest>,
}
