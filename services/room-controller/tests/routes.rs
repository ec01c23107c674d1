use std::time::Duration;

use escape_room_engine::VenueLayout;
use escape_shared_types::{GameStatus, RoomMap, ServerToClient, SessionOutcome};
use futures_util::{SinkExt, StreamExt};
use room_controller::{router, AppState};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

struct Room {
    base: String,
    ws: String,
    http: reqwest::Client,
    state: AppState,
}

async fn room() -> Room {
    let state = AppState::boot(VenueLayout::bundled().unwrap()).await.unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Room { base: format!("http://{addr}"), ws: format!("ws://{addr}/ws"), http: reqwest::Client::new(), state }
}

impl Room {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.http.post(format!("{}{path}", self.base)).json(&body).send().await.unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.http.get(format!("{}{path}", self.base)).send().await.unwrap()
    }

    async fn map_until(&self, pred: impl Fn(&RoomMap) -> bool) -> RoomMap {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let map: RoomMap = self.get("/map").await.json().await.unwrap();
                if pred(&map) {
                    return map;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("map never reached the expected state")
    }
}

fn interact(puzzle: &str, stage: &str, piece: &str, interacted: bool) -> Value {
    json!({ "puzzleId": puzzle, "stageId": stage, "pieceId": piece, "interacted": interacted })
}

#[tokio::test]
async fn pieces_drive_the_totem_rule() {
    let room = room().await;
    assert_eq!(room.get("/healthz").await.text().await.unwrap(), "ok");
    for (piece, on) in [("piece_1", true), ("piece_2", false), ("piece_3", true), ("piece_4", true)] {
        assert!(room.post("/pieces/interact", interact("puzzle_1", "stage_1", piece, on)).await.status().is_success());
    }
    let map = room.map_until(|m| m.puzzles.get("puzzle_1").is_some_and(|p| p.solved)).await;
    assert!(map.sensors["totem_light"].active);
    assert!(map.puzzles["puzzle_2"].stages["stage_1"].action.as_ref().unwrap().activated);

    let reset: Value = room.post("/puzzles/puzzle_1/reset", json!({})).await.json().await.unwrap();
    assert_eq!(reset["ok"], true);
    room.map_until(|m| !m.puzzles["puzzle_1"].solved && !m.sensors["totem_light"].active).await;
    assert_eq!(room.post("/puzzles/puzzle_9/reset", json!({})).await.status(), 404);
    room.state.scope.close();
}

#[tokio::test]
async fn bad_writes_map_to_client_errors() {
    let room = room().await;
    assert_eq!(room.post("/pieces/interact", interact("puzzle_9", "stage_1", "piece_1", true)).await.status(), 404);
    assert_eq!(room.post("/sensors/nope", json!({ "active": true })).await.status(), 404);
    let ok = room.post("/sensors/scarab_door", json!({ "active": true, "playerId": "staff-1" })).await;
    assert!(ok.status().is_success());
    let map = room.map_until(|m| m.sensors["scarab_door"].active).await;
    assert_eq!(map.sensors["scarab_door"].history.len(), 1);
    room.state.scope.close();
}

#[tokio::test]
async fn game_lifecycle_starts_once() {
    let room = room().await;
    assert_eq!(room.get("/game").await.status(), 404);
    assert_eq!(room.post("/game/start", json!({})).await.status(), 404);
    let profane = room.post("/game", json!({ "teamName": "Holy Shit", "roomId": "tomb", "bookingId": "b-1" })).await;
    assert_eq!(profane.status(), 400);

    let created: GameStatus = room
        .post("/game", json!({ "teamName": "  Tomb Raiders ", "roomId": "tomb", "bookingId": "b-1" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(created.phase, "not_started");
    assert_eq!(created.game.team_name, "Tomb Raiders");

    let started: GameStatus = room.post("/game/start", json!({ "durationSecs": 120 })).await.json().await.unwrap();
    assert_eq!(started.phase, "running");
    assert!(started.remaining_secs.is_some_and(|s| s <= 120 && s > 100));
    assert!(started.game.started_at.is_some());

    assert_eq!(room.post("/game/start", json!({})).await.status(), 409);
    assert_eq!(room.post("/game", json!({ "teamName": "Late", "roomId": "tomb", "bookingId": "b-2" })).await.status(), 409);
    assert_eq!(room.post("/admin/reset", json!({})).await.status(), 409);
    room.state.scope.close();
}

#[tokio::test]
async fn hint_requests_round_trip_through_staff() {
    let room = room().await;
    let filed: Value = room
        .post("/hints/request", json!({ "puzzleId": "puzzle_1", "stageId": "stage_1", "playerId": "player-2" }))
        .await
        .json()
        .await
        .unwrap();
    let id = filed["requestId"].as_str().unwrap().to_string();
    room.map_until(|m| m.hint_requests.contains_key(&id)).await;

    let pending: Vec<Value> = room.get("/hints/pending").await.json().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["requestId"], id.as_str());
    assert_eq!(pending[0]["puzzleId"], "puzzle_1");

    assert!(room.post(&format!("/hints/{id}/approve"), json!({})).await.status().is_success());
    assert_eq!(room.post(&format!("/hints/{id}/decline"), json!({})).await.status(), 409);
    assert_eq!(room.post("/hints/missing/approve", json!({})).await.status(), 404);
    let map = room.map_until(|m| m.puzzles["puzzle_1"].stages["stage_1"].hints.values().all(|h| h.shared)).await;
    assert!(map.puzzles["puzzle_2"].stages["stage_1"].hints.values().all(|h| !h.shared));
    room.state.scope.close();
}

async fn next_message(ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin)) -> ServerToClient {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no message from the room")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

#[tokio::test]
async fn live_feed_carries_hint_and_session_notices() {
    let room = room().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(room.ws.as_str()).await.unwrap();
    match next_message(&mut ws).await {
        ServerToClient::Map(map) => assert!(map.puzzles.contains_key("puzzle_4")),
        other => panic!("expected the map first, got {other:?}"),
    }

    let filed: Value = room.post("/hints/request", json!({ "puzzleId": "puzzle_4", "stageId": "stage_1" })).await.json().await.unwrap();
    let id = filed["requestId"].as_str().unwrap().to_string();
    let approve = json!({ "type": "APPROVE_HINT", "data": { "requestId": id } });
    ws.send(Message::Text(approve.to_string())).await.unwrap();
    loop {
        if let ServerToClient::HintResolved(resolved) = next_message(&mut ws).await {
            assert_eq!(resolved.request_id, id);
            break;
        }
    }

    room.post("/game", json!({ "teamName": "Gear Heads", "roomId": "tomb", "bookingId": "b-7" })).await;
    room.post("/game/start", json!({})).await;
    for gear in ["gear_1", "gear_2", "gear_3", "gear_4"] {
        room.post("/pieces/interact", interact("puzzle_4", "stage_1", gear, true)).await;
    }
    loop {
        if let ServerToClient::SessionEnded(ended) = next_message(&mut ws).await {
            assert_eq!(ended.outcome, SessionOutcome::Escaped);
            break;
        }
    }
    let status: GameStatus = room.get("/game").await.json().await.unwrap();
    assert_eq!(status.phase, "ended");
    assert_eq!(status.game.outcome, Some(SessionOutcome::Escaped));
    room.state.scope.close();
}
