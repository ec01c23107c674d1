use std::sync::Arc;

use escape_room_engine::hints::pending;
use escape_room_engine::{DocumentStore, HintError, HintQueue, MemoryStore, VenueLayout};
use escape_shared_types::{paths, HintRequest, HintRequestState, RoomMap};
use serde_json::json;

async fn seeded() -> (Arc<MemoryStore>, HintQueue<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    VenueLayout::bundled().unwrap().seed(store.as_ref()).await.unwrap();
    (store.clone(), HintQueue::new(store))
}

async fn shared_flags(store: &MemoryStore, puzzle: &str, stage: &str) -> Vec<bool> {
    store
        .list(&paths::hints(puzzle, stage))
        .await
        .unwrap()
        .into_iter()
        .map(|doc| doc.data["shared"].as_bool().unwrap_or(false))
        .collect()
}

async fn state(store: &MemoryStore, id: &str) -> HintRequestState {
    let doc = store.get(&paths::hint_request(id)).await.unwrap().unwrap();
    serde_json::from_value::<HintRequest>(doc).unwrap().state
}

#[tokio::test]
async fn approval_shares_every_hint_of_the_stage_and_nothing_else() {
    let (store, hints) = seeded().await;
    let id = hints.request("puzzle_1", "stage_1", Some("player-3")).await.unwrap();
    assert_eq!(state(&store, &id).await, HintRequestState::Pending);

    assert_eq!(hints.approve(&id).await.unwrap(), 2);
    assert_eq!(shared_flags(&store, "puzzle_1", "stage_1").await, vec![true, true]);
    assert_eq!(shared_flags(&store, "puzzle_2", "stage_1").await, vec![false]);
    assert_eq!(state(&store, &id).await, HintRequestState::Approved);
}

#[tokio::test]
async fn decline_changes_no_hint() {
    let (store, hints) = seeded().await;
    let id = hints.request("puzzle_1", "stage_1", None).await.unwrap();
    hints.decline(&id).await.unwrap();
    assert_eq!(shared_flags(&store, "puzzle_1", "stage_1").await, vec![false, false]);
    assert_eq!(state(&store, &id).await, HintRequestState::Declined);
}

#[tokio::test]
async fn resolved_requests_are_final() {
    let (store, hints) = seeded().await;
    let approved = hints.request("puzzle_1", "stage_1", None).await.unwrap();
    hints.approve(&approved).await.unwrap();
    let declined = hints.request("puzzle_2", "stage_1", None).await.unwrap();
    hints.decline(&declined).await.unwrap();

    assert!(matches!(
        hints.approve(&approved).await,
        Err(HintError::AlreadyResolved { state: HintRequestState::Approved, .. })
    ));
    assert!(matches!(
        hints.approve(&declined).await,
        Err(HintError::AlreadyResolved { state: HintRequestState::Declined, .. })
    ));
    assert!(matches!(hints.decline(&approved).await, Err(HintError::AlreadyResolved { .. })));
    // the declined stage never got its hint
    assert_eq!(shared_flags(&store, "puzzle_2", "stage_1").await, vec![false]);
}

#[tokio::test]
async fn unknown_and_malformed_requests() {
    let (store, hints) = seeded().await;
    assert!(matches!(hints.approve("missing").await, Err(HintError::UnknownRequest(id)) if id == "missing"));
    store.set(&paths::hint_request("junk"), json!({ "state": 7 })).await.unwrap();
    assert!(matches!(hints.decline("junk").await, Err(HintError::Malformed { .. })));
}

#[test]
fn pending_lists_open_requests_oldest_first() {
    let request = |minute: u32, state| HintRequest {
        puzzle_id: "puzzle_1".into(),
        stage_id: "stage_1".into(),
        state,
        player_id: None,
        created_at: Some(chrono::DateTime::parse_from_rfc3339(&format!("2024-05-01T18:{minute:02}:00Z")).unwrap().into()),
    };
    let mut map = RoomMap::default();
    map.hint_requests.insert("a".into(), request(30, HintRequestState::Pending));
    map.hint_requests.insert("b".into(), request(10, HintRequestState::Pending));
    map.hint_requests.insert("c".into(), request(5, HintRequestState::Approved));
    map.hint_requests.insert("d".into(), request(20, HintRequestState::Declined));

    let ids: Vec<_> = pending(&map).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["b", "a"]);
}
