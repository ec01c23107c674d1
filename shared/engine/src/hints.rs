//! Staff approval of player hint requests. `pending` is the only state a
//! request leaves; `approved` and `declined` are final.

use std::sync::Arc;

use chrono::Utc;
use escape_shared_types::{paths, HintRequest, HintRequestState, RoomMap};

use crate::error::StoreError;
use crate::store::{DocumentStore, FieldUpdates};

#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("no hint request {0}")]
    UnknownRequest(String),
    #[error("hint request {id} is already {state:?}")]
    AlreadyResolved { id: String, state: HintRequestState },
    #[error("hint request {id} is malformed: {source}")]
    Malformed { id: String, source: serde_json::Error },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pending requests in arrival order.
pub fn pending(map: &RoomMap) -> Vec<(&str, &HintRequest)> {
    let mut open: Vec<_> = map
        .hint_requests
        .iter()
        .filter(|(_, request)| request.state == HintRequestState::Pending)
        .map(|(id, request)| (id.as_str(), request))
        .collect();
    open.sort_by_key(|(id, request)| (request.created_at, *id));
    open
}

pub struct HintQueue<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> HintQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Player-side entry point: files a new pending request.
    pub async fn request(&self, puzzle_id: &str, stage_id: &str, player_id: Option<&str>) -> Result<String, HintError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let request = HintRequest {
            puzzle_id: puzzle_id.to_string(),
            stage_id: stage_id.to_string(),
            state: HintRequestState::Pending,
            player_id: player_id.map(str::to_owned),
            created_at: Some(Utc::now()),
        };
        let doc = serde_json::to_value(&request).map_err(|source| HintError::Malformed { id: id.clone(), source })?;
        self.store.set(&paths::hint_request(&id), doc).await?;
        tracing::info!(request = %id, puzzle = %puzzle_id, stage = %stage_id, "hint requested");
        Ok(id)
    }

    /// Shares every hint under the requested stage, then closes the request.
    /// Returns the number of hints shared.
    pub async fn approve(&self, id: &str) -> Result<usize, HintError> {
        let request = self.load_pending(id).await?;
        let hints = self.store.list(&paths::hints(&request.puzzle_id, &request.stage_id)).await?;
        let shared = FieldUpdates::new().set("shared", true);
        for hint in &hints {
            self.store
                .update(&paths::hint(&request.puzzle_id, &request.stage_id, &hint.id), &shared)
                .await?;
        }
        self.resolve(id, HintRequestState::Approved).await?;
        tracing::info!(request = %id, hints = hints.len(), "hint request approved");
        Ok(hints.len())
    }

    pub async fn decline(&self, id: &str) -> Result<(), HintError> {
        self.load_pending(id).await?;
        self.resolve(id, HintRequestState::Declined).await?;
        tracing::info!(request = %id, "hint request declined");
        Ok(())
    }

    async fn load_pending(&self, id: &str) -> Result<HintRequest, HintError> {
        let doc = self
            .store
            .get(&paths::hint_request(id))
            .await?
            .ok_or_else(|| HintError::UnknownRequest(id.to_string()))?;
        let request: HintRequest =
            serde_json::from_value(doc).map_err(|source| HintError::Malformed { id: id.to_string(), source })?;
        if request.state.is_terminal() {
            return Err(HintError::AlreadyResolved {
                id: id.to_string(),
                state: request.state,
            });
        }
        Ok(request)
    }

    async fn resolve(&self, id: &str, state: HintRequestState) -> Result<(), StoreError> {
        let value = serde_json::to_value(state).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store
            .update(&paths::hint_request(id), &FieldUpdates::new().set("state", value))
            .await
    }
}
