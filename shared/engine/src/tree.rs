//! Rebuilds the puzzle → stage → hint tree from independently streamed
//! collections and keeps the live [`RoomMap`] current.
//!
//! The store only streams one collection level at a time, so every puzzle
//! discovered opens a stages listener and every stage discovered opens a hints
//! listener. A snapshot at any level replaces that level of the affected
//! puzzle wholesale; deeper levels already known are carried over for entries
//! that are still present. Sibling puzzles are never touched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use escape_shared_types::{paths, Hint, HintRequest, Puzzle, PuzzleId, RoomMap, Sensor, Stage, StageId};
use tokio::sync::{mpsc, watch};

use crate::error::StoreError;
use crate::registry::SubscriptionScope;
use crate::store::{DocumentStore, Snapshot, SnapshotStream};

#[derive(Debug, Clone)]
pub enum TreeEvent {
    Puzzles(Snapshot),
    Stages { puzzle: PuzzleId, snapshot: Snapshot },
    Hints { puzzle: PuzzleId, stage: StageId, snapshot: Snapshot },
    Sensors(Snapshot),
    HintRequests(Snapshot),
}

/// Parents seen for the first time; each needs its child listener opened.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Discovered {
    pub puzzles: Vec<PuzzleId>,
    pub stages: Vec<(PuzzleId, StageId)>,
}

#[derive(Debug, Default)]
pub struct TreeBuilder {
    map: RoomMap,
    seen_puzzles: BTreeSet<PuzzleId>,
    seen_stages: BTreeSet<(PuzzleId, StageId)>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self) -> &RoomMap {
        &self.map
    }

    pub fn apply(&mut self, event: TreeEvent) -> Discovered {
        let mut discovered = Discovered::default();
        match event {
            TreeEvent::Puzzles(snapshot) => {
                let mut previous = std::mem::take(&mut self.map.puzzles);
                for (id, mut puzzle) in snapshot.decode::<Puzzle>() {
                    puzzle.stages = previous.remove(&id).map(|p| p.stages).unwrap_or_default();
                    if self.seen_puzzles.insert(id.clone()) {
                        discovered.puzzles.push(id.clone());
                    }
                    self.map.puzzles.insert(id, puzzle);
                }
            }
            TreeEvent::Stages { puzzle, snapshot } => {
                let Some(target) = self.map.puzzles.get_mut(&puzzle) else {
                    tracing::debug!(%puzzle, "stages for a puzzle no longer in the tree");
                    return discovered;
                };
                let mut previous = std::mem::take(&mut target.stages);
                for (id, mut stage) in snapshot.decode::<Stage>() {
                    stage.hints = previous.remove(&id).map(|s| s.hints).unwrap_or_default();
                    let key = (puzzle.clone(), id.clone());
                    if self.seen_stages.insert(key.clone()) {
                        discovered.stages.push(key);
                    }
                    target.stages.insert(id, stage);
                }
            }
            TreeEvent::Hints { puzzle, stage, snapshot } => {
                let Some(target) = self.map.puzzles.get_mut(&puzzle).and_then(|p| p.stages.get_mut(&stage)) else {
                    tracing::debug!(%puzzle, %stage, "hints for a stage no longer in the tree");
                    return discovered;
                };
                target.hints = snapshot.decode::<Hint>().into_iter().collect::<BTreeMap<_, _>>();
            }
            TreeEvent::Sensors(snapshot) => {
                self.map.sensors = snapshot.decode::<Sensor>().into_iter().collect();
            }
            TreeEvent::HintRequests(snapshot) => {
                self.map.hint_requests = snapshot.decode::<HintRequest>().into_iter().collect();
            }
        }
        discovered
    }
}

/// Starts the listeners behind the live map. All of them, including nested
/// listeners opened later, belong to `scope`.
pub fn watch_room<S: DocumentStore>(
    store: Arc<S>,
    scope: &SubscriptionScope,
) -> Result<watch::Receiver<RoomMap>, StoreError> {
    let (events_tx, mut events) = mpsc::unbounded_channel::<TreeEvent>();
    forward(scope, store.subscribe(paths::PUZZLES)?, events_tx.clone(), TreeEvent::Puzzles);
    forward(scope, store.subscribe(paths::SENSORS)?, events_tx.clone(), TreeEvent::Sensors);
    forward(scope, store.subscribe(paths::HINT_REQUESTS)?, events_tx.clone(), TreeEvent::HintRequests);

    let (map_tx, map_rx) = watch::channel(RoomMap::default());
    let nested_scope = scope.clone();
    scope.spawn(async move {
        let mut builder = TreeBuilder::new();
        while let Some(event) = events.recv().await {
            let discovered = builder.apply(event);
            for puzzle in discovered.puzzles {
                let id = puzzle.clone();
                match store.subscribe(&paths::stages(&puzzle)) {
                    Ok(stream) => forward(&nested_scope, stream, events_tx.clone(), move |snapshot| TreeEvent::Stages {
                        puzzle: id.clone(),
                        snapshot,
                    }),
                    Err(err) => tracing::warn!(%puzzle, %err, "could not listen to stages"),
                }
            }
            for (puzzle, stage) in discovered.stages {
                let (p, s) = (puzzle.clone(), stage.clone());
                match store.subscribe(&paths::hints(&puzzle, &stage)) {
                    Ok(stream) => forward(&nested_scope, stream, events_tx.clone(), move |snapshot| TreeEvent::Hints {
                        puzzle: p.clone(),
                        stage: s.clone(),
                        snapshot,
                    }),
                    Err(err) => tracing::warn!(%puzzle, %stage, %err, "could not listen to hints"),
                }
            }
            map_tx.send_replace(builder.map().clone());
        }
    });
    Ok(map_rx)
}

fn forward<F>(scope: &SubscriptionScope, mut stream: SnapshotStream, events: mpsc::UnboundedSender<TreeEvent>, wrap: F)
where
    F: Fn(Snapshot) -> TreeEvent + Send + 'static,
{
    scope.spawn(async move {
        while let Some(next) = stream.recv().await {
            match next {
                Ok(snapshot) => {
                    if events.send(wrap(snapshot)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    // no retry: this sub-tree stops updating
                    tracing::warn!(%err, "realtime listener failed");
                    break;
                }
            }
        }
    });
}
