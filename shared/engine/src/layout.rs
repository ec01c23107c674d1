//! Venue layout: the initial state of every puzzle and sensor in a room, the
//! completion rules, and the countdown settings. Loaded from JSON.

use std::collections::BTreeMap;
use std::path::Path;

use escape_shared_types::{paths, Puzzle, PuzzleId, Sensor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::rules::{Effect, Rule, RuleError, RuleTable};
use crate::store::DocumentStore;

const BUNDLED_VENUE: &str = include_str!("../venue/tomb.json");

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("reading venue layout: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing venue layout: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("{0} references unknown {1}")]
    UnknownReference(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownConfig {
    pub duration_secs: u64,
    /// The game is won once this puzzle is solved and `exit_sensor` reads inactive.
    pub final_puzzle: PuzzleId,
    pub exit_sensor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueLayout {
    pub room: String,
    pub countdown: CountdownConfig,
    pub puzzles: BTreeMap<PuzzleId, Puzzle>,
    pub sensors: BTreeMap<String, Sensor>,
    pub rules: Vec<Rule>,
}

impl VenueLayout {
    pub fn from_json(raw: &str) -> Result<Self, LayoutError> {
        let layout: Self = serde_json::from_str(raw)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LayoutError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// The layout shipped with the controller.
    pub fn bundled() -> Result<Self, LayoutError> {
        Self::from_json(BUNDLED_VENUE)
    }

    pub fn rule_table(&self) -> Result<RuleTable, LayoutError> {
        Ok(RuleTable::from_rules(self.rules.iter().cloned())?)
    }

    fn validate(&self) -> Result<(), LayoutError> {
        RuleTable::from_rules(self.rules.iter().cloned())?;
        let unknown = |owner: &str, what: String| Err(LayoutError::UnknownReference(owner.to_string(), what));
        let has_stage = |p: &str, s: &str| self.puzzles.get(p).is_some_and(|puzzle| puzzle.stages.contains_key(s));

        if !self.puzzles.contains_key(&self.countdown.final_puzzle) {
            return unknown("countdown", format!("puzzle {}", self.countdown.final_puzzle));
        }
        if !self.sensors.contains_key(&self.countdown.exit_sensor) {
            return unknown("countdown", format!("sensor {}", self.countdown.exit_sensor));
        }
        for rule in &self.rules {
            let label = rule.label();
            let Some(stage) = self.puzzles.get(&rule.puzzle).and_then(|p| p.stages.get(&rule.stage)) else {
                return unknown(&label, format!("stage {}/{}", rule.puzzle, rule.stage));
            };
            if let Some(piece) = rule.required.keys().find(|piece| !stage.pieces.contains_key(*piece)) {
                return unknown(&label, format!("piece {piece}"));
            }
            for effect in &rule.on_success {
                match effect {
                    Effect::SetSensor { sensor, .. } if !self.sensors.contains_key(sensor) => {
                        return unknown(&label, format!("sensor {sensor}"));
                    }
                    Effect::UnlockStage { puzzle, stage } | Effect::SolveStage { puzzle, stage } if !has_stage(puzzle, stage) => {
                        return unknown(&label, format!("stage {puzzle}/{stage}"));
                    }
                    Effect::SolvePuzzle { puzzle } if !self.puzzles.contains_key(puzzle) => {
                        return unknown(&label, format!("puzzle {puzzle}"));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Writes the initial documents. Stage hints go to their own collection.
    pub async fn seed<S: DocumentStore + ?Sized>(&self, store: &S) -> Result<usize, StoreError> {
        let mut written = 0;
        for (puzzle_id, puzzle) in &self.puzzles {
            let mut doc = puzzle.clone();
            let stages = std::mem::take(&mut doc.stages);
            store.set(&paths::puzzle(puzzle_id), to_doc(&doc)?).await?;
            written += 1;
            for (stage_id, stage) in stages {
                let mut doc = stage;
                let hints = std::mem::take(&mut doc.hints);
                store.set(&paths::stage(puzzle_id, &stage_id), to_doc(&doc)?).await?;
                written += 1;
                for (hint_id, hint) in hints {
                    store.set(&paths::hint(puzzle_id, &stage_id, &hint_id), to_doc(&hint)?).await?;
                    written += 1;
                }
            }
        }
        for (name, sensor) in &self.sensors {
            store.set(&paths::sensor(name), to_doc(sensor)?).await?;
            written += 1;
        }
        tracing::info!(room = %self.room, documents = written, "venue seeded");
        Ok(written)
    }
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}
