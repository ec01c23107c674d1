//! Live room controller: hosts the room's document store, keeps the map,
//! automation and countdown running, and exposes staff actions over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use escape_room_engine::hints::{self, HintError};
use escape_room_engine::session::{self, SessionError};
use escape_room_engine::{
    watch_room, Automation, DocumentStore, HintQueue, MemoryStore, Phase, Session, StoreError, SubscriptionScope,
    VenueLayout,
};
use escape_shared_types::{
    paths, CreateGameReq, ErrorMsg, Game, GameStatus, HintRequest, HintRequestReq, HintRequestState, HintResolved,
    InteractReq, ResetResp, RoomMap, SensorReq, ServerToClient, SessionEnded, StartGameReq,
};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

pub mod ws;

/// Current game of the room. The countdown task owns its own copy of the
/// session; this one mirrors it for status reads.
struct GameSlot {
    game_id: String,
    session: Session,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub automation: Automation<MemoryStore>,
    pub hints: Arc<HintQueue<MemoryStore>>,
    pub map: watch::Receiver<RoomMap>,
    pub layout: Arc<VenueLayout>,
    pub events: broadcast::Sender<ServerToClient>,
    pub scope: SubscriptionScope,
    game: Arc<Mutex<Option<GameSlot>>>,
}

impl AppState {
    /// Seeds a fresh store from the layout and starts the map watcher and
    /// the automation listeners. Everything runs inside `scope`.
    pub async fn boot(layout: VenueLayout) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let written = layout.seed(store.as_ref()).await.context("seeding the room")?;
        let rules = layout.rule_table().context("loading completion rules")?;
        tracing::info!(room = %layout.room, documents = written, rules = rules.len(), "room seeded");

        let scope = SubscriptionScope::new();
        let map = watch_room(store.clone(), &scope).context("starting the map watcher")?;
        let automation = Automation::new(store.clone(), rules);
        automation.watch(&scope).context("starting automation")?;
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            hints: Arc::new(HintQueue::new(store.clone())),
            store,
            automation,
            map,
            layout: Arc::new(layout),
            events,
            scope,
            game: Arc::new(Mutex::new(None)),
        })
    }

    fn game_slot(&self) -> std::sync::MutexGuard<'_, Option<GameSlot>> {
        self.game.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves a hint request and tells every connected client.
    pub async fn resolve_hint(&self, request_id: &str, state: HintRequestState) -> Result<(), AppError> {
        match state {
            HintRequestState::Approved => {
                self.hints.approve(request_id).await?;
            }
            HintRequestState::Declined => self.hints.decline(request_id).await?,
            HintRequestState::Pending => return Err(AppError::BadRequest("a request cannot go back to pending".into())),
        }
        let _ = self.events.send(ServerToClient::HintResolved(HintResolved {
            request_id: request_id.to_string(),
            state,
        }));
        Ok(())
    }
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.as_str()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.as_str()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg.as_str()),
        }
    }

    pub fn to_msg(&self) -> ErrorMsg {
        let (_, code, msg) = self.parts();
        ErrorMsg { code: code.into(), msg: msg.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, _, _) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        (status, Json(self.to_msg())).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::InvalidPath(_) | StoreError::InvalidField { .. } | StoreError::NotAnObject(_) => {
                AppError::BadRequest(err.to_string())
            }
            StoreError::Backend(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<HintError> for AppError {
    fn from(err: HintError) -> Self {
        match err {
            HintError::UnknownRequest(_) => AppError::NotFound(err.to_string()),
            HintError::AlreadyResolved { .. } => AppError::Conflict(err.to_string()),
            HintError::Malformed { .. } => AppError::Internal(err.to_string()),
            HintError::Store(err) => err.into(),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::TeamName(_) => AppError::BadRequest(err.to_string()),
            SessionError::AlreadyStarted | SessionError::AlreadyEnded => AppError::Conflict(err.to_string()),
            SessionError::Store(err) => err.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OkResp { ok: bool }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HintRequestResp { request_id: String }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingHint {
    request_id: String,
    #[serde(flatten)]
    request: HintRequest,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/map", get(room_map))
        .route("/pieces/interact", post(interact))
        .route("/sensors/:name", post(set_sensor))
        .route("/puzzles/:id/reset", post(reset_puzzle))
        .route("/admin/reset", post(admin_reset))
        .route("/game", get(game_status).post(create_game))
        .route("/game/start", post(start_game))
        .route("/hints/pending", get(pending_hints))
        .route("/hints/request", post(request_hint))
        .route("/hints/:id/approve", post(approve_hint))
        .route("/hints/:id/decline", post(decline_hint))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

async fn room_map(State(state): State<AppState>) -> Json<RoomMap> {
    Json(state.map.borrow().clone())
}

/// Player interaction with one piece; automation picks the change up from
/// the stage listener.
async fn interact(State(state): State<AppState>, Json(req): Json<InteractReq>) -> Result<Json<OkResp>, AppError> {
    state.automation.interact(&req.puzzle_id, &req.stage_id, &req.piece_id, req.interacted).await?;
    Ok(Json(OkResp { ok: true }))
}

async fn set_sensor(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<SensorReq>,
) -> Result<Json<OkResp>, AppError> {
    state.automation.set_sensor(&name, req.active, req.player_id.as_deref()).await?;
    Ok(Json(OkResp { ok: true }))
}

async fn reset_puzzle(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ResetResp>, AppError> {
    if state.automation.rules().for_puzzle(&id).next().is_none() {
        return Err(AppError::NotFound(format!("no rules for puzzle {id}")));
    }
    let report = state.automation.reset_puzzle(&id).await;
    tracing::info!(puzzle = %id, writes = report.writes, failures = report.failures, "puzzle reset");
    Ok(Json(ResetResp { ok: report.failures == 0, writes: report.writes, failures: report.failures }))
}

/// Between-games reset. Refused while a session is running.
async fn admin_reset(State(state): State<AppState>) -> Result<Json<ResetResp>, AppError> {
    if let Some(slot) = state.game_slot().as_ref() {
        if matches!(slot.session.phase(), Phase::Running { .. }) {
            return Err(AppError::Conflict(format!("game {} is still running", slot.game_id)));
        }
    }
    let report = state.automation.reset_all().await;
    Ok(Json(ResetResp { ok: report.failures == 0, writes: report.writes, failures: report.failures }))
}

async fn create_game(State(state): State<AppState>, Json(req): Json<CreateGameReq>) -> Result<Json<GameStatus>, AppError> {
    if let Some(slot) = state.game_slot().as_ref() {
        if matches!(slot.session.phase(), Phase::Running { .. }) {
            return Err(AppError::Conflict(format!("game {} is still running", slot.game_id)));
        }
    }
    let game_id = uuid::Uuid::new_v4().simple().to_string();
    let game = session::create_game(state.store.as_ref(), &game_id, &req.team_name, &req.room_id, &req.booking_id).await?;
    let session = Session::new(Duration::from_secs(state.layout.countdown.duration_secs));
    let status = status_of(&game_id, game, &session);
    *state.game_slot() = Some(GameSlot { game_id, session });
    Ok(Json(status))
}

/// Starts the countdown for the current game. A game starts at most once.
async fn start_game(State(state): State<AppState>, req: Option<Json<StartGameReq>>) -> Result<Json<GameStatus>, AppError> {
    let Json(req) = req.unwrap_or_default();
    let (game_id, session, before) = {
        let mut slot = state.game_slot();
        let slot = slot.as_mut().ok_or_else(|| AppError::NotFound("no game created".into()))?;
        if let (Phase::NotStarted, Some(secs)) = (slot.session.phase(), req.duration_secs) {
            slot.session = Session::new(Duration::from_secs(secs));
        }
        let before = slot.session.clone();
        slot.session.start(Instant::now())?;
        (slot.game_id.clone(), slot.session.clone(), before)
    };
    if let Err(err) = session::mark_started(state.store.as_ref(), &game_id).await {
        // the game never started, so it must stay startable
        if let Some(slot) = state.game_slot().as_mut().filter(|slot| slot.game_id == game_id) {
            slot.session = before;
        }
        return Err(err.into());
    }
    tracing::info!(game = %game_id, remaining = ?session.remaining(Instant::now()), "game started");

    let room = state.clone();
    let countdown_game = game_id.clone();
    state.scope.spawn(async move {
        let config = room.layout.countdown.clone();
        let end = session::run_countdown(room.store.clone(), countdown_game.clone(), session, config, room.map.clone()).await;
        let Some(end) = end else { return };
        if let Some(slot) = room.game_slot().as_mut().filter(|slot| slot.game_id == countdown_game) {
            slot.session.finish(end.outcome);
        }
        let _ = room.events.send(ServerToClient::SessionEnded(SessionEnded {
            game_id: countdown_game,
            outcome: end.outcome,
        }));
    });

    current_status(&state).await.map(Json)
}

async fn game_status(State(state): State<AppState>) -> Result<Json<GameStatus>, AppError> {
    current_status(&state).await.map(Json)
}

async fn current_status(state: &AppState) -> Result<GameStatus, AppError> {
    let (game_id, session) = state
        .game_slot()
        .as_ref()
        .map(|slot| (slot.game_id.clone(), slot.session.clone()))
        .ok_or_else(|| AppError::NotFound("no game created".into()))?;
    let doc = state
        .store
        .get(&paths::game(&game_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("game {game_id} is gone")))?;
    let game: Game = serde_json::from_value(doc).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(status_of(&game_id, game, &session))
}

fn status_of(game_id: &str, game: Game, session: &Session) -> GameStatus {
    let remaining_secs = match session.phase() {
        Phase::Running { .. } => Some(session.remaining(Instant::now()).as_secs()),
        _ => None,
    };
    GameStatus {
        game_id: game_id.to_string(),
        game,
        phase: session.phase().name().to_string(),
        remaining_secs,
    }
}

async fn pending_hints(State(state): State<AppState>) -> Json<Vec<PendingHint>> {
    let map = state.map.borrow().clone();
    let open = hints::pending(&map)
        .into_iter()
        .map(|(id, request)| PendingHint { request_id: id.to_string(), request: request.clone() })
        .collect();
    Json(open)
}

async fn request_hint(State(state): State<AppState>, Json(req): Json<HintRequestReq>) -> Result<Json<HintRequestResp>, AppError> {
    let request_id = state.hints.request(&req.puzzle_id, &req.stage_id, req.player_id.as_deref()).await?;
    Ok(Json(HintRequestResp { request_id }))
}

async fn approve_hint(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<OkResp>, AppError> {
    state.resolve_hint(&id, HintRequestState::Approved).await?;
    Ok(Json(OkResp { ok: true }))
}

async fn decline_hint(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<OkResp>, AppError> {
    state.resolve_hint(&id, HintRequestState::Declined).await?;
    Ok(Json(OkResp { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_start_leaves_the_game_startable() {
        let state = AppState::boot(VenueLayout::bundled().unwrap()).await.unwrap();
        *state.game_slot() = Some(GameSlot {
            game_id: "vanished".into(),
            session: Session::new(Duration::from_secs(60)),
        });

        let err = start_game(State(state.clone()), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(state.game_slot().as_ref().unwrap().session.phase(), Phase::NotStarted);

        let req = CreateGameReq { team_name: "Second Try".into(), room_id: "tomb".into(), booking_id: "b-2".into() };
        let created = create_game(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(created.0.phase, "not_started");
        state.scope.close();
    }
}
