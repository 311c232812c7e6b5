//! In-process reference backend used by tests and the match simulator.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;

use super::{DocumentSnapshot, DocumentStore, DocumentWatch, Patch, StoreError, StoreResult};

/// Shared in-memory document store with the same observable semantics the
/// coordination layer expects from a real backend: create-if-absent rejects
/// duplicates, patches merge per field with last-write-wins, and subscribers
/// receive a monotonically versioned, possibly coalesced snapshot feed.
///
/// Cloning is cheap and every clone addresses the same documents, so one
/// instance can stand in for the shared service across many simulated
/// clients.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

/// One stored document; the watch sender owns the current snapshot.
struct Slot {
    sender: watch::Sender<DocumentSnapshot>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a document outright, closing every live watch on it. Test hook
    /// for the "session no longer exists" failure mode; not part of the
    /// store contract.
    pub fn remove(&self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Current version of a document, if it exists.
    pub fn version(&self, id: &str) -> Option<u64> {
        self.slots.get(id).map(|slot| slot.sender.borrow().version)
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, id: &str) -> BoxFuture<'static, StoreResult<Option<Value>>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move {
            Ok(store
                .slots
                .get(&id)
                .map(|slot| slot.sender.borrow().body.as_ref().clone()))
        })
    }

    fn create(&self, id: &str, document: Value) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move {
            match store.slots.entry(id.clone()) {
                Entry::Occupied(_) => Err(StoreError::AlreadyExists { id }),
                Entry::Vacant(vacant) => {
                    let (sender, _) = watch::channel(DocumentSnapshot {
                        version: 1,
                        body: Arc::new(document),
                    });
                    vacant.insert(Slot { sender });
                    Ok(())
                }
            }
        })
    }

    fn patch(&self, id: &str, patch: Patch) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move {
            let Some(slot) = store.slots.get(&id) else {
                return Err(StoreError::NotFound { id });
            };
            // send_modify serializes concurrent patches on the channel lock
            // and notifies subscribers once per write.
            slot.sender.send_modify(|snapshot| {
                let mut body = snapshot.body.as_ref().clone();
                patch.apply(&mut body);
                snapshot.version += 1;
                snapshot.body = Arc::new(body);
            });
            Ok(())
        })
    }

    fn subscribe(&self, id: &str) -> BoxFuture<'static, StoreResult<DocumentWatch>> {
        let store = self.clone();
        let id = id.to_string();
        Box::pin(async move {
            let Some(slot) = store.slots.get(&id) else {
                return Err(StoreError::NotFound { id });
            };
            Ok(DocumentWatch::new(slot.sender.subscribe()))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_rejects_duplicates() {
        let store = MemoryStore::new();
        store
            .create("session-1", json!({ "state": "forming" }))
            .await
            .unwrap();

        match store.create("session-1", json!({})).await {
            Err(StoreError::AlreadyExists { id }) => assert_eq!(id, "session-1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_creates_admit_exactly_one_winner() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create("session-1", json!({ "creator": n })).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn patch_merges_fields_and_bumps_version() {
        let store = MemoryStore::new();
        store
            .create("session-1", json!({ "state": "forming", "coordination": {} }))
            .await
            .unwrap();

        store
            .patch(
                "session-1",
                Patch::new()
                    .set("state", json!("active"))
                    .set("coordination.readyCount", json!(2)),
            )
            .await
            .unwrap();

        let body = store.read("session-1").await.unwrap().unwrap();
        assert_eq!(body["state"], json!("active"));
        assert_eq!(body["coordination"]["readyCount"], json!(2));
        assert_eq!(store.version("session-1"), Some(2));
    }

    #[tokio::test]
    async fn patch_missing_document_is_not_found() {
        let store = MemoryStore::new();
        match store.patch("nope", Patch::new().set("a", json!(1))).await {
            Err(StoreError::NotFound { id }) => assert_eq!(id, "nope"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn watch_coalesces_bursts_to_latest_version() {
        let store = MemoryStore::new();
        store.create("session-1", json!({ "n": 0 })).await.unwrap();
        let mut watch = store.subscribe("session-1").await.unwrap();
        assert_eq!(watch.latest().version, 1);

        for n in 1..=5 {
            store
                .patch("session-1", Patch::new().set("n", json!(n)))
                .await
                .unwrap();
        }

        let snapshot = watch.changed().await.unwrap();
        assert_eq!(snapshot.version, 6);
        assert_eq!(snapshot.body["n"], json!(5));
    }

    #[tokio::test]
    async fn removing_a_document_closes_its_watches() {
        let store = MemoryStore::new();
        store.create("session-1", json!({})).await.unwrap();
        let mut watch = store.subscribe("session-1").await.unwrap();

        assert!(store.remove("session-1"));
        assert!(watch.changed().await.is_err());
    }

    #[tokio::test]
    async fn stream_adapter_yields_snapshots_until_removal() {
        let store = MemoryStore::new();
        store.create("session-1", json!({ "n": 0 })).await.unwrap();
        let mut stream = store.subscribe("session-1").await.unwrap().into_stream();

        // The current snapshot is yielded up front.
        assert_eq!(stream.next().await.unwrap().version, 1);

        store
            .patch("session-1", Patch::new().set("n", json!(1)))
            .await
            .unwrap();
        let snapshot = stream.next().await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.body["n"], json!(1));

        store.remove("session-1");
        assert!(stream.next().await.is_none());
    }
}
