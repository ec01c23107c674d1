//! Collection and document paths in the realtime store.

pub const PUZZLES: &str = "puzzles";
pub const SENSORS: &str = "sensors";
pub const HINT_REQUESTS: &str = "hintRequests";
pub const GAMES: &str = "games";

pub fn puzzle(puzzle: &str) -> String { format!("{PUZZLES}/{puzzle}") }

pub fn stages(puzzle: &str) -> String { format!("{PUZZLES}/{puzzle}/stages") }

pub fn stage(puzzle: &str, stage: &str) -> String { format!("{}/{stage}", stages(puzzle)) }

pub fn hints(puzzle: &str, stage: &str) -> String { format!("{}/hints", self::stage(puzzle, stage)) }

pub fn hint(puzzle: &str, stage: &str, hint: &str) -> String { format!("{}/{hint}", hints(puzzle, stage)) }

pub fn sensor(name: &str) -> String { format!("{SENSORS}/{name}") }

pub fn hint_request(id: &str) -> String { format!("{HINT_REQUESTS}/{id}") }

pub fn game(id: &str) -> String { format!("{GAMES}/{id}") }

/// Dotted field path of a piece's interaction flag inside its stage document.
pub fn piece_interacted(piece: &str) -> String { format!("pieces.{piece}.isInteracted") }
