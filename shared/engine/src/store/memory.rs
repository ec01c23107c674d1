use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{apply_field, check_collection_path, split_doc_path, Document, DocumentStore, FieldUpdates, Snapshot};
use crate::error::StoreError;

type Watcher = mpsc::UnboundedSender<Result<Snapshot, StoreError>>;

/// In-process realtime store. Documents live in one ordered map keyed by
/// full path; watchers are keyed by collection path.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, Value>,
    watchers: HashMap<String, Vec<Watcher>>,
}

impl Inner {
    fn children(&self, collection: &str) -> Vec<Document> {
        let prefix = format!("{collection}/");
        self.docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, data)| {
                let id = &path[prefix.len()..];
                (!id.contains('/')).then(|| Document {
                    id: id.to_string(),
                    data: data.clone(),
                })
            })
            .collect()
    }

    fn snapshot(&self, collection: &str) -> Snapshot {
        Snapshot {
            collection: collection.to_string(),
            docs: self.children(collection),
        }
    }

    fn notify(&mut self, collection: &str) {
        if !self.watchers.contains_key(collection) {
            return;
        }
        let snapshot = self.snapshot(collection);
        if let Some(watchers) = self.watchers.get_mut(collection) {
            watchers.retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open watchers across all collections; closed receivers are pruned on
    /// the next write to their collection.
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.values().map(Vec::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        split_doc_path(path)?;
        Ok(self.lock().docs.get(path).cloned())
    }

    async fn set(&self, path: &str, data: Value) -> Result<(), StoreError> {
        let (collection, _) = split_doc_path(path)?;
        if !data.is_object() {
            return Err(StoreError::NotAnObject(path.to_string()));
        }
        let mut inner = self.lock();
        inner.docs.insert(path.to_string(), data);
        inner.notify(collection);
        Ok(())
    }

    async fn update(&self, path: &str, updates: &FieldUpdates) -> Result<(), StoreError> {
        let (collection, _) = split_doc_path(path)?;
        let mut inner = self.lock();
        let current = inner
            .docs
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        // all fields land together or none do
        let mut next = current.clone();
        for (field, value) in updates.iter() {
            apply_field(&mut next, field, value.clone())?;
        }
        inner.docs.insert(path.to_string(), next);
        inner.notify(collection);
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        check_collection_path(collection)?;
        Ok(self.lock().children(collection))
    }

    fn subscribe(&self, collection: &str) -> Result<super::SnapshotStream, StoreError> {
        check_collection_path(collection)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let _ = tx.send(Ok(inner.snapshot(collection)));
        inner.watchers.entry(collection.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_get_the_current_snapshot_then_every_change() {
        let store = MemoryStore::new();
        store.set("sensors/door", json!({ "active": false })).await.unwrap();
        let mut rx = store.subscribe("sensors").unwrap();
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.docs.len(), 1);

        store.update("sensors/door", &FieldUpdates::new().set("active", true)).await.unwrap();
        let next = rx.recv().await.unwrap().unwrap();
        assert_eq!(next.docs[0].data["active"], true);
    }

    #[tokio::test]
    async fn nested_documents_stay_out_of_parent_snapshots() {
        let store = MemoryStore::new();
        store.set("puzzles/p1", json!({})).await.unwrap();
        store.set("puzzles/p1/stages/s1", json!({})).await.unwrap();
        store.set("puzzlesx/p9", json!({})).await.unwrap();
        let ids: Vec<_> = store.list("puzzles").await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["p1"]);
    }

    #[tokio::test]
    async fn failed_updates_change_nothing() {
        let store = MemoryStore::new();
        assert_eq!(
            store.update("games/g1", &FieldUpdates::new().set("x", 1)).await,
            Err(StoreError::NotFound("games/g1".into()))
        );
        store.set("games/g1", json!({ "team": "a", "meta": 3 })).await.unwrap();
        let updates = FieldUpdates::new().set("team", "b").set("meta.deep", true);
        assert!(store.update("games/g1", &updates).await.is_err());
        assert_eq!(store.get("games/g1").await.unwrap(), Some(json!({ "team": "a", "meta": 3 })));
        assert!(matches!(store.set("games/g2", json!([1])).await, Err(StoreError::NotAnObject(_))));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let store = MemoryStore::new();
        drop(store.subscribe("sensors").unwrap());
        assert_eq!(store.watcher_count(), 1);
        store.set("sensors/door", json!({})).await.unwrap();
        assert_eq!(store.watcher_count(), 0);
    }
}
