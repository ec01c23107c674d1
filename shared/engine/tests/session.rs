use std::sync::Arc;
use std::time::Duration;

use escape_room_engine::session::{create_game, mark_started, run_countdown, win_inputs, SessionError};
use escape_room_engine::{CountdownConfig, DocumentStore, FieldUpdates, MemoryStore, Phase, Session, SessionEnd, VenueLayout};
use escape_shared_types::{paths, Game, Puzzle, RoomMap, Sensor, SessionOutcome};
use tokio::sync::watch;
use tokio::time::Instant;

fn config() -> CountdownConfig {
    CountdownConfig {
        duration_secs: 3,
        final_puzzle: "puzzle_4".into(),
        exit_sensor: "exit_maglock".into(),
    }
}

fn map(final_solved: bool, exit_active: bool) -> RoomMap {
    let mut map = RoomMap::default();
    map.puzzles.insert("puzzle_4".into(), Puzzle { solved: final_solved, ..Default::default() });
    map.sensors.insert("exit_maglock".into(), Sensor { kind: "lock".into(), active: exit_active, history: vec![] });
    map
}

#[test]
fn zero_and_win_in_the_same_tick_end_once() {
    let start = Instant::now();
    let mut session = Session::new(Duration::from_secs(3));
    session.start(start).unwrap();
    let deadline = start + Duration::from_secs(3);

    assert_eq!(session.tick(deadline - Duration::from_millis(1)), None);
    assert_eq!(session.remaining(deadline - Duration::from_millis(1)), Duration::from_millis(1));
    assert_eq!(session.tick(deadline), Some(SessionEnd { outcome: SessionOutcome::TimedOut }));
    assert_eq!(session.observe_win(true, false), None);
    assert_eq!(session.tick(deadline + Duration::from_secs(1)), None);
    assert_eq!(session.phase(), Phase::Ended(SessionOutcome::TimedOut));
    assert_eq!(session.remaining(deadline), Duration::ZERO);
}

#[test]
fn win_first_blocks_the_timeout() {
    let start = Instant::now();
    let mut session = Session::new(Duration::from_secs(3));
    session.start(start).unwrap();
    assert_eq!(session.observe_win(true, true), None);
    assert_eq!(session.observe_win(false, false), None);
    assert_eq!(session.observe_win(true, false), Some(SessionEnd { outcome: SessionOutcome::Escaped }));
    assert_eq!(session.tick(start + Duration::from_secs(3)), None);
}

#[test]
fn no_way_back_once_ended() {
    let mut session = Session::new(Duration::from_secs(1));
    assert_eq!(session.finish(SessionOutcome::Escaped), None, "cannot end before starting");
    assert_eq!(session.tick(Instant::now() + Duration::from_secs(5)), None);
    session.start(Instant::now()).unwrap();
    assert!(matches!(session.start(Instant::now()), Err(SessionError::AlreadyStarted)));
    session.finish(SessionOutcome::Escaped).unwrap();
    assert!(matches!(session.start(Instant::now()), Err(SessionError::AlreadyEnded)));
}

#[test]
fn win_inputs_wait_for_both_documents() {
    assert_eq!(win_inputs(&RoomMap::default(), &config()), None);
    assert_eq!(win_inputs(&map(true, false), &config()), Some((true, false)));
}

async fn game(store: &MemoryStore, id: &str) -> Game {
    serde_json::from_value(store.get(&paths::game(id)).await.unwrap().unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn countdown_times_out_and_persists_once() {
    let store = Arc::new(MemoryStore::new());
    create_game(store.as_ref(), "g1", "The Escapists", "tomb", "b-1").await.unwrap();
    mark_started(store.as_ref(), "g1").await.unwrap();
    let mut session = Session::new(Duration::from_secs(3));
    session.start(Instant::now()).unwrap();
    let (_map_tx, map_rx) = watch::channel(map(false, true));

    let end = run_countdown(store.clone(), "g1".into(), session, config(), map_rx).await;
    assert_eq!(end, Some(SessionEnd { outcome: SessionOutcome::TimedOut }));
    let stored = game(&store, "g1").await;
    assert_eq!(stored.outcome, Some(SessionOutcome::TimedOut));
    assert!(stored.started_at.is_some() && stored.ended_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn countdown_ends_on_the_win_condition() {
    let store = Arc::new(MemoryStore::new());
    create_game(store.as_ref(), "g2", "Gear Heads", "tomb", "b-2").await.unwrap();
    let mut session = Session::new(Duration::from_secs(600));
    session.start(Instant::now()).unwrap();
    let (map_tx, map_rx) = watch::channel(map(false, true));

    let countdown = tokio::spawn(run_countdown(store.clone(), "g2".into(), session, config(), map_rx));
    tokio::time::sleep(Duration::from_secs(5)).await;
    map_tx.send_replace(map(true, true));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!countdown.is_finished());
    map_tx.send_replace(map(true, false));

    let end = countdown.await.unwrap();
    assert_eq!(end, Some(SessionEnd { outcome: SessionOutcome::Escaped }));
    assert_eq!(game(&store, "g2").await.outcome, Some(SessionOutcome::Escaped));
}

#[tokio::test(start_paused = true)]
async fn countdown_keeps_ticking_when_the_map_goes_away() {
    let store = Arc::new(MemoryStore::new());
    create_game(store.as_ref(), "g3", "Night Owls", "tomb", "b-3").await.unwrap();
    let mut session = Session::new(Duration::from_secs(2));
    session.start(Instant::now()).unwrap();
    let (map_tx, map_rx) = watch::channel(RoomMap::default());
    drop(map_tx);
    let end = run_countdown(store.clone(), "g3".into(), session, config(), map_rx).await;
    assert_eq!(end, Some(SessionEnd { outcome: SessionOutcome::TimedOut }));
}

#[tokio::test]
async fn countdown_refuses_a_session_that_was_never_started() {
    let store = Arc::new(MemoryStore::new());
    let (_tx, rx) = watch::channel(RoomMap::default());
    let end = run_countdown(store, "g".into(), Session::new(Duration::from_secs(1)), config(), rx).await;
    assert_eq!(end, None);
}

#[tokio::test]
async fn games_reject_profane_team_names() {
    let store = MemoryStore::new();
    let err = create_game(&store, "g4", "Shit Show", "tomb", "b-4").await.unwrap_err();
    assert!(matches!(err, SessionError::TeamName(_)));
    assert_eq!(store.get(&paths::game("g4")).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn countdown_follows_the_live_room() {
    let layout = VenueLayout::bundled().unwrap();
    let store = Arc::new(MemoryStore::new());
    layout.seed(store.as_ref()).await.unwrap();
    create_game(store.as_ref(), "g5", "Tomb Raiders", "tomb", "b-5").await.unwrap();
    let scope = escape_room_engine::SubscriptionScope::new();
    let map = escape_room_engine::watch_room(store.clone(), &scope).unwrap();
    let mut session = Session::new(Duration::from_secs(layout.countdown.duration_secs));
    session.start(Instant::now()).unwrap();
    let countdown = tokio::spawn(run_countdown(store.clone(), "g5".into(), session, layout.countdown.clone(), map));

    tokio::time::sleep(Duration::from_secs(30)).await;
    store.update(&paths::puzzle("puzzle_4"), &FieldUpdates::new().set("solved", true)).await.unwrap();
    store.update(&paths::sensor("exit_maglock"), &FieldUpdates::new().set("active", false)).await.unwrap();
    let end = countdown.await.unwrap();
    assert_eq!(end, Some(SessionEnd { outcome: SessionOutcome::Escaped }));
    scope.close();
}
