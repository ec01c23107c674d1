//! Game session countdown.
//!
//! `NotStarted → Running → Ended`. Both ways a session can end (the clock
//! running out, the win condition being observed) go through the single
//! guarded [`Session::finish`] transition, and [`run_countdown`] drives both
//! triggers from one task, so the end write happens once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use escape_shared_types::team_name::{validate_team_name, TeamNameError};
use escape_shared_types::{paths, Game, RoomMap, SessionOutcome};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::StoreError;
use crate::layout::CountdownConfig;
use crate::store::{DocumentStore, FieldUpdates};

pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid team name: {0}")]
    TeamName(#[from] TeamNameError),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session already ended")]
    AlreadyEnded,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running { deadline: Instant },
    Ended(SessionOutcome),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::NotStarted => "not_started",
            Phase::Running { .. } => "running",
            Phase::Ended(_) => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub outcome: SessionOutcome,
}

#[derive(Debug, Clone)]
pub struct Session {
    phase: Phase,
    duration: Duration,
}

impl Session {
    pub fn new(duration: Duration) -> Self {
        Self {
            phase: Phase::NotStarted,
            duration,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start(&mut self, now: Instant) -> Result<(), SessionError> {
        match self.phase {
            Phase::NotStarted => {
                self.phase = Phase::Running {
                    deadline: now + self.duration,
                };
                Ok(())
            }
            Phase::Running { .. } => Err(SessionError::AlreadyStarted),
            Phase::Ended(_) => Err(SessionError::AlreadyEnded),
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match self.phase {
            Phase::NotStarted => self.duration,
            Phase::Running { deadline } => deadline.saturating_duration_since(now),
            Phase::Ended(_) => Duration::ZERO,
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<SessionEnd> {
        match self.phase {
            Phase::Running { deadline } if now >= deadline => self.finish(SessionOutcome::TimedOut),
            _ => None,
        }
    }

    pub fn observe_win(&mut self, final_solved: bool, exit_active: bool) -> Option<SessionEnd> {
        if final_solved && !exit_active {
            self.finish(SessionOutcome::Escaped)
        } else {
            None
        }
    }

    /// The only transition into `Ended`; yields the end exactly once.
    pub fn finish(&mut self, outcome: SessionOutcome) -> Option<SessionEnd> {
        match self.phase {
            Phase::Running { .. } => {
                self.phase = Phase::Ended(outcome);
                Some(SessionEnd { outcome })
            }
            _ => None,
        }
    }
}

/// `(final puzzle solved, exit sensor active)`, or `None` while either
/// document has not arrived yet.
pub fn win_inputs(map: &RoomMap, config: &CountdownConfig) -> Option<(bool, bool)> {
    let solved = map.puzzles.get(&config.final_puzzle)?.solved;
    let exit_active = map.sensors.get(&config.exit_sensor)?.active;
    Some((solved, exit_active))
}

/// Creates the game document for a scanned ticket. The session itself starts
/// later, when staff press start.
pub async fn create_game<S: DocumentStore + ?Sized>(
    store: &S,
    game_id: &str,
    team_name: &str,
    room_id: &str,
    booking_id: &str,
) -> Result<Game, SessionError> {
    let game = Game {
        team_name: validate_team_name(team_name)?,
        room_id: room_id.to_string(),
        booking_id: booking_id.to_string(),
        started_at: None,
        ended_at: None,
        outcome: None,
    };
    let doc = serde_json::to_value(&game).map_err(|e| StoreError::Backend(e.to_string()))?;
    store.set(&paths::game(game_id), doc).await?;
    tracing::info!(game = %game_id, team = %game.team_name, "game created");
    Ok(game)
}

pub async fn mark_started<S: DocumentStore + ?Sized>(store: &S, game_id: &str) -> Result<(), StoreError> {
    let updates = FieldUpdates::new().set("startedAt", Utc::now().to_rfc3339());
    store.update(&paths::game(game_id), &updates).await
}

/// Drives a started session until it ends, then persists the end state once.
pub async fn run_countdown<S: DocumentStore + ?Sized>(
    store: Arc<S>,
    game_id: String,
    mut session: Session,
    config: CountdownConfig,
    mut map: watch::Receiver<RoomMap>,
) -> Option<SessionEnd> {
    if !matches!(session.phase(), Phase::Running { .. }) {
        tracing::warn!(game = %game_id, phase = session.phase().name(), "countdown needs a running session");
        return None;
    }
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut map_open = true;

    let initial = win_inputs(&map.borrow_and_update(), &config);
    let mut end = initial.and_then(|(solved, exit_active)| session.observe_win(solved, exit_active));

    while end.is_none() {
        tokio::select! {
            _ = ticker.tick() => {
                end = session.tick(Instant::now());
            }
            changed = map.changed(), if map_open => {
                if changed.is_err() {
                    tracing::warn!(game = %game_id, "room map closed, only the clock can end the game now");
                    map_open = false;
                    continue;
                }
                let inputs = win_inputs(&map.borrow_and_update(), &config);
                if let Some((solved, exit_active)) = inputs {
                    end = session.observe_win(solved, exit_active);
                }
            }
        }
    }
    let end = end?;

    let outcome = serde_json::to_value(end.outcome).unwrap_or_default();
    let updates = FieldUpdates::new()
        .set("endedAt", Utc::now().to_rfc3339())
        .set("outcome", outcome);
    if let Err(err) = store.update(&paths::game(&game_id), &updates).await {
        tracing::warn!(game = %game_id, %err, "could not persist session end");
    }
    tracing::info!(game = %game_id, outcome = ?end.outcome, "session ended");
    Some(end)
}
