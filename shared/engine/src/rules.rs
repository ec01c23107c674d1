//! Declarative stage completion rules.
//!
//! A rule names one stage, the interaction state every listed piece must be
//! in, and the ordered writes that follow once the stage is solved. Adding a
//! puzzle to a venue is a data change to its layout file.

use std::collections::{BTreeMap, BTreeSet};

use escape_shared_types::{paths, PieceId, PuzzleId, Stage, StageId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::FieldUpdates;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Effect {
    SetSensor { sensor: String, active: bool },
    /// Sets `action.activated` on the stage it unlocks.
    UnlockStage { puzzle: PuzzleId, stage: StageId },
    SolveStage { puzzle: PuzzleId, stage: StageId },
    SolvePuzzle { puzzle: PuzzleId },
}

/// One document write.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub path: String,
    pub updates: FieldUpdates,
}

impl Write {
    fn flag(path: String, field: &str, value: bool) -> Self {
        Self {
            path,
            updates: FieldUpdates::new().set(field, Value::Bool(value)),
        }
    }
}

impl Effect {
    pub fn forward(&self) -> Write {
        self.write(true)
    }

    /// Writes back the value the field held before `forward`.
    pub fn undo(&self) -> Write {
        self.write(false)
    }

    fn write(&self, forward: bool) -> Write {
        match self {
            Effect::SetSensor { sensor, active } => {
                let value = if forward { *active } else { !*active };
                Write::flag(paths::sensor(sensor), "active", value)
            }
            Effect::UnlockStage { puzzle, stage } => Write::flag(paths::stage(puzzle, stage), "action.activated", forward),
            Effect::SolveStage { puzzle, stage } => Write::flag(paths::stage(puzzle, stage), "solved", forward),
            Effect::SolvePuzzle { puzzle } => Write::flag(paths::puzzle(puzzle), "solved", forward),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub name: Option<String>,
    pub puzzle: PuzzleId,
    pub stage: StageId,
    /// piece id → required `isInteracted`; `false` entries are the negated terms
    pub required: BTreeMap<PieceId, bool>,
    pub on_success: Vec<Effect>,
}

impl Rule {
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("{}/{}", self.puzzle, self.stage))
    }

    /// Unknown pieces count as not interacted.
    pub fn holds(&self, stage: &Stage) -> bool {
        self.required.iter().all(|(piece, want)| stage.is_interacted(piece) == *want)
    }

    pub fn forward_writes(&self) -> Vec<Write> {
        self.on_success.iter().map(Effect::forward).collect()
    }

    /// Pieces are cleared first, so a listener watching the stage never sees
    /// `solved = false` while the predicate still holds.
    pub fn reset_writes(&self) -> Vec<Write> {
        let pieces = self
            .required
            .keys()
            .fold(FieldUpdates::new(), |updates, piece| updates.set(paths::piece_interacted(piece), false));
        let mut writes = vec![Write {
            path: paths::stage(&self.puzzle, &self.stage),
            updates: pieces,
        }];
        writes.extend(self.on_success.iter().rev().map(Effect::undo));
        writes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("two rules for stage {puzzle}/{stage}")]
    Duplicate { puzzle: PuzzleId, stage: StageId },
    #[error("rule {0} requires no pieces")]
    NoPieces(String),
    #[error("rule {0} has no effects")]
    NoEffects(String),
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: BTreeMap<(PuzzleId, StageId), Rule>,
}

impl RuleTable {
    pub fn from_rules(rules: impl IntoIterator<Item = Rule>) -> Result<Self, RuleError> {
        let mut table = BTreeMap::new();
        for rule in rules {
            if rule.required.is_empty() {
                return Err(RuleError::NoPieces(rule.label()));
            }
            if rule.on_success.is_empty() {
                return Err(RuleError::NoEffects(rule.label()));
            }
            let key = (rule.puzzle.clone(), rule.stage.clone());
            if table.contains_key(&key) {
                return Err(RuleError::Duplicate { puzzle: key.0, stage: key.1 });
            }
            table.insert(key, rule);
        }
        Ok(Self { rules: table })
    }

    pub fn find(&self, puzzle: &str, stage: &str) -> Option<&Rule> {
        self.rules.get(&(puzzle.to_string(), stage.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn for_puzzle<'a>(&'a self, puzzle: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.values().filter(move |r| r.puzzle == puzzle)
    }

    /// Puzzles whose stages have at least one rule.
    pub fn puzzles(&self) -> BTreeSet<PuzzleId> {
        self.rules.keys().map(|(puzzle, _)| puzzle.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escape_shared_types::Piece;

    fn totem() -> Rule {
        Rule {
            name: Some("totem".into()),
            puzzle: "puzzle_1".into(),
            stage: "stage_1".into(),
            required: [("piece_1", true), ("piece_2", false), ("piece_3", true), ("piece_4", true)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            on_success: vec![
                Effect::SetSensor { sensor: "totem_light".into(), active: true },
                Effect::SolveStage { puzzle: "puzzle_1".into(), stage: "stage_1".into() },
            ],
        }
    }

    fn stage(flags: [bool; 4]) -> Stage {
        let mut stage = Stage::default();
        for (i, flag) in flags.into_iter().enumerate() {
            stage.pieces.insert(format!("piece_{}", i + 1), Piece { kind: "head".into(), is_interacted: flag });
        }
        stage
    }

    #[test]
    fn totem_holds_only_for_its_exact_combination() {
        let rule = totem();
        let solved = [true, false, true, true];
        assert!(rule.holds(&stage(solved)));
        for flip in 0..4 {
            let mut flags = solved;
            flags[flip] = !flags[flip];
            assert!(!rule.holds(&stage(flags)), "flip of piece_{} must not solve", flip + 1);
        }
    }

    #[test]
    fn missing_pieces_read_as_not_interacted() {
        let rule = totem();
        let mut partial = stage([true, false, true, true]);
        partial.pieces.remove("piece_2");
        assert!(rule.holds(&partial));
        partial.pieces.remove("piece_1");
        assert!(!rule.holds(&partial));
    }

    #[test]
    fn reset_clears_pieces_before_undoing_effects_in_reverse() {
        let writes = totem().reset_writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].path, "puzzles/puzzle_1/stages/stage_1");
        assert_eq!(writes[0].updates.iter().count(), 4);
        assert!(writes[0].updates.iter().all(|(_, v)| v == &Value::Bool(false)));
        assert_eq!(writes[1], Write::flag("puzzles/puzzle_1/stages/stage_1".into(), "solved", false));
        assert_eq!(writes[2], Write::flag("sensors/totem_light".into(), "active", false));
    }

    #[test]
    fn undo_of_a_deactivating_sensor_reactivates_it() {
        let effect = Effect::SetSensor { sensor: "exit_maglock".into(), active: false };
        assert_eq!(effect.undo(), Write::flag("sensors/exit_maglock".into(), "active", true));
    }

    #[test]
    fn table_rejects_duplicates_and_empty_rules() {
        assert!(matches!(RuleTable::from_rules([totem(), totem()]), Err(RuleError::Duplicate { .. })));
        let mut empty = totem();
        empty.required.clear();
        assert!(matches!(RuleTable::from_rules([empty]), Err(RuleError::NoPieces(_))));
        let table = RuleTable::from_rules([totem()]).unwrap();
        assert!(table.find("puzzle_1", "stage_1").is_some());
        assert!(table.find("puzzle_1", "stage_2").is_none());
    }
}
