//! Applies the rule table against live stage state.
//!
//! Writes are issued one at a time and awaited in order. There is no
//! transaction: a failed write stops the chain and leaves the earlier writes
//! in place.

use std::sync::Arc;

use chrono::Utc;
use escape_shared_types::{paths, Sensor, SensorEvent, Stage};
use serde_json::Value;

use crate::error::StoreError;
use crate::registry::SubscriptionScope;
use crate::rules::{RuleTable, Write};
use crate::store::{DocumentStore, FieldUpdates};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoRule,
    AlreadySolved,
    NotSatisfied,
    Fired { writes: usize },
    Interrupted { applied: usize, error: StoreError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub writes: usize,
    pub failures: usize,
}

impl ResetReport {
    fn absorb(&mut self, other: ResetReport) {
        self.writes += other.writes;
        self.failures += other.failures;
    }
}

pub struct Automation<S> {
    store: Arc<S>,
    rules: Arc<RuleTable>,
}

impl<S> Clone for Automation<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            rules: Arc::clone(&self.rules),
        }
    }
}

impl<S: DocumentStore> Automation<S> {
    pub fn new(store: Arc<S>, rules: RuleTable) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub async fn evaluate(&self, puzzle: &str, stage_id: &str, stage: &Stage) -> Outcome {
        let Some(rule) = self.rules.find(puzzle, stage_id) else {
            return Outcome::NoRule;
        };
        if stage.solved {
            return Outcome::AlreadySolved;
        }
        if !rule.holds(stage) {
            return Outcome::NotSatisfied;
        }
        tracing::info!(rule = %rule.label(), "stage solved, applying effects");
        match self.apply(&rule.forward_writes()).await {
            Ok(writes) => Outcome::Fired { writes },
            Err((applied, error)) => {
                tracing::warn!(rule = %rule.label(), applied, %error, "effect chain interrupted");
                Outcome::Interrupted { applied, error }
            }
        }
    }

    async fn apply(&self, writes: &[Write]) -> Result<usize, (usize, StoreError)> {
        for (applied, write) in writes.iter().enumerate() {
            self.store
                .update(&write.path, &write.updates)
                .await
                .map_err(|e| (applied, e))?;
        }
        Ok(writes.len())
    }

    /// Listens to the stages of every puzzle that has rules and evaluates each
    /// stage against the newest snapshot. Snapshots queued while an effect
    /// chain was running are skipped, so a chain never replays from stale flags.
    pub fn watch(&self, scope: &SubscriptionScope) -> Result<(), StoreError> {
        for puzzle in self.rules.puzzles() {
            let mut stream = self.store.subscribe(&paths::stages(&puzzle))?;
            let automation = self.clone();
            scope.spawn(async move {
                while let Some(mut next) = stream.recv().await {
                    while next.is_ok() {
                        match stream.try_recv() {
                            Ok(newer) => next = newer,
                            Err(_) => break,
                        }
                    }
                    let snapshot = match next {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            tracing::warn!(%puzzle, %err, "stage listener failed");
                            break;
                        }
                    };
                    for (stage_id, stage) in snapshot.decode::<Stage>() {
                        automation.evaluate(&puzzle, &stage_id, &stage).await;
                    }
                }
            });
        }
        Ok(())
    }

    pub async fn interact(&self, puzzle: &str, stage: &str, piece: &str, interacted: bool) -> Result<(), StoreError> {
        let updates = FieldUpdates::new().set(paths::piece_interacted(piece), interacted);
        self.store.update(&paths::stage(puzzle, stage), &updates).await
    }

    /// Manual override from staff; recorded in the sensor's history.
    pub async fn set_sensor(&self, name: &str, active: bool, player_id: Option<&str>) -> Result<(), StoreError> {
        let path = paths::sensor(name);
        let doc = self.store.get(&path).await?.ok_or_else(|| StoreError::NotFound(path.clone()))?;
        let mut sensor: Sensor = serde_json::from_value(doc).map_err(|e| StoreError::Backend(e.to_string()))?;
        sensor.history.push(SensorEvent {
            player_id: player_id.map(str::to_owned),
            action: if active { "activate".into() } else { "deactivate".into() },
            timestamp: Utc::now(),
        });
        let history = serde_json::to_value(&sensor.history).map_err(|e| StoreError::Backend(e.to_string()))?;
        let updates = FieldUpdates::new().set("active", active).set("history", history);
        self.store.update(&path, &updates).await?;
        tracing::info!(sensor = %name, active, "sensor override");
        Ok(())
    }

    pub async fn reset_puzzle(&self, puzzle: &str) -> ResetReport {
        let mut report = ResetReport::default();
        for rule in self.rules.for_puzzle(puzzle) {
            report.absorb(self.apply_all(&rule.reset_writes()).await);
        }
        report
    }

    /// Between-games reset: every rule's reset, then every piece of every stage
    /// cleared, every hint hidden again and every open hint request declined.
    pub async fn reset_all(&self) -> ResetReport {
        let mut report = ResetReport::default();
        for rule in self.rules.iter() {
            report.absorb(self.apply_all(&rule.reset_writes()).await);
        }
        match self.sweep_writes().await {
            Ok(writes) => report.absorb(self.apply_all(&writes).await),
            Err(err) => {
                tracing::warn!(%err, "could not list documents for the reset sweep");
                report.failures += 1;
            }
        }
        tracing::info!(writes = report.writes, failures = report.failures, "room reset");
        report
    }

    async fn sweep_writes(&self) -> Result<Vec<Write>, StoreError> {
        let mut writes = Vec::new();
        for puzzle in self.store.list(paths::PUZZLES).await? {
            for stage_doc in self.store.list(&paths::stages(&puzzle.id)).await? {
                let stage: Stage = serde_json::from_value(stage_doc.data).unwrap_or_default();
                if !stage.pieces.is_empty() {
                    let updates = stage
                        .pieces
                        .keys()
                        .fold(FieldUpdates::new(), |u, piece| u.set(paths::piece_interacted(piece), false));
                    writes.push(Write {
                        path: paths::stage(&puzzle.id, &stage_doc.id),
                        updates,
                    });
                }
                for hint in self.store.list(&paths::hints(&puzzle.id, &stage_doc.id)).await? {
                    writes.push(Write {
                        path: paths::hint(&puzzle.id, &stage_doc.id, &hint.id),
                        updates: FieldUpdates::new().set("shared", false),
                    });
                }
            }
        }
        for request in self.store.list(paths::HINT_REQUESTS).await? {
            if request.data.get("state") == Some(&Value::from("pending")) {
                writes.push(Write {
                    path: paths::hint_request(&request.id),
                    updates: FieldUpdates::new().set("state", "declined"),
                });
            }
        }
        Ok(writes)
    }

    /// Unlike the forward chain, a failed reset write does not stop the rest.
    async fn apply_all(&self, writes: &[Write]) -> ResetReport {
        let mut report = ResetReport::default();
        for write in writes {
            match self.store.update(&write.path, &write.updates).await {
                Ok(()) => report.writes += 1,
                Err(err) => {
                    tracing::warn!(path = %write.path, %err, "reset write failed");
                    report.failures += 1;
                }
            }
        }
        report
    }
}
