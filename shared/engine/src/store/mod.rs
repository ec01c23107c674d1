//! Seam to the realtime document store.
//!
//! Paths alternate collection and document segments
//! (`puzzles/{id}/stages/{id}`). Reads are either one-shot (`get`, `list`) or
//! live (`subscribe`), where every change to a direct child of the collection
//! produces a full snapshot of that collection.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;

mod memory;

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub collection: String,
    pub docs: Vec<Document>,
}

impl Snapshot {
    /// Documents that do not decode are logged and left out.
    pub fn decode<T: DeserializeOwned>(&self) -> Vec<(String, T)> {
        self.docs
            .iter()
            .filter_map(|doc| match serde_json::from_value::<T>(doc.data.clone()) {
                Ok(value) => Some((doc.id.clone(), value)),
                Err(err) => {
                    tracing::warn!(collection = %self.collection, id = %doc.id, %err, "skipping undecodable document");
                    None
                }
            })
            .collect()
    }
}

pub type SnapshotStream = mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>;

/// Partial update addressed by dotted field paths, e.g. `pieces.piece_1.isInteracted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdates(Vec<(String, Value)>);

impl FieldUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError>;

    /// Fails with `NotFound` when the document does not exist.
    async fn update(&self, path: &str, updates: &FieldUpdates) -> Result<(), StoreError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// The current snapshot is delivered right away, then one per change.
    fn subscribe(&self, collection: &str) -> Result<SnapshotStream, StoreError>;
}

/// Splits a document path into its parent collection and id.
pub fn split_doc_path(path: &str) -> Result<(&str, &str), StoreError> {
    let segments = path.split('/').count();
    if segments % 2 != 0 || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    path.rsplit_once('/')
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))
}

pub fn check_collection_path(path: &str) -> Result<(), StoreError> {
    let segments = path.split('/').count();
    if segments % 2 != 1 || path.split('/').any(str::is_empty) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Writes `value` at a dotted path inside `doc`, creating intermediate maps.
pub fn apply_field(doc: &mut Value, field: &str, value: Value) -> Result<(), StoreError> {
    let invalid = |reason| StoreError::InvalidField {
        field: field.to_string(),
        reason,
    };
    let segments: Vec<&str> = field.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("empty segment"));
    }
    let (last, parents) = segments.split_last().ok_or_else(|| invalid("empty path"))?;
    let mut cursor = doc;
    for segment in parents {
        let map = cursor.as_object_mut().ok_or_else(|| invalid("parent is not a map"))?;
        cursor = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let map = cursor.as_object_mut().ok_or_else(|| invalid("parent is not a map"))?;
    map.insert(last.to_string(), value);
    Ok(())
}
