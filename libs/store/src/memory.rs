//! In-process coordination store.
//!
//! [`MemoryStore`] keeps every node in a single mutex-guarded map with a
//! monotonically increasing modification index. Watchers are fed from inside
//! the lock, so each one observes changes in index order with nothing dropped
//! or repeated.
//!
//! ## Limitations
//!
//! - **Single-process only**: nodes are not visible across process boundaries
//! - **No persistence**: all state is lost when the process exits
//!
//! Lease deadlines use the tokio clock, so tests can pause and advance time.
//! Expired nodes are purged lazily at the start of every operation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::{CoordinationStore, StoreError, StoreNode, StoreWatch, WatchEvent, WatchEventKind};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
    created_index: u64,
    modified_index: u64,
}

impl Entry {
    fn to_node(&self, key: &str) -> StoreNode {
        StoreNode {
            key: key.to_string(),
            value: self.value.clone(),
            ttl: self.ttl,
            index: self.modified_index,
        }
    }
}

#[derive(Debug)]
struct Watcher {
    id: u64,
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

/// Store state protected by a single lock.
#[derive(Debug, Default)]
struct StoreState {
    nodes: BTreeMap<String, Entry>,
    index: u64,
    next_watch_id: u64,
    watchers: Vec<Watcher>,
}

impl StoreState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Deliver a change to every watcher whose prefix covers the key.
    ///
    /// Watchers whose receiving side is gone are dropped here.
    fn notify(&mut self, kind: WatchEventKind, node: StoreNode, index: u64) {
        let event = WatchEvent {
            kind,
            node,
            index,
            occurred_at: Utc::now(),
        };

        self.watchers.retain(|watcher| {
            if !event.node.key.starts_with(&watcher.prefix) {
                return !watcher.tx.is_closed();
            }
            let delivered = watcher.tx.send(event.clone()).is_ok();
            if !delivered {
                debug!(watch_id = watcher.id, prefix = %watcher.prefix, "Watcher gone, unsubscribing");
            }
            delivered
        });
    }

    /// Remove every node whose lease ran out, earliest deadline first.
    fn purge_expired(&mut self, now: Instant) {
        let mut expired: Vec<(Instant, String)> = self
            .nodes
            .iter()
            .filter_map(|(key, entry)| {
                entry
                    .expires_at
                    .filter(|deadline| *deadline <= now)
                    .map(|deadline| (deadline, key.clone()))
            })
            .collect();

        if expired.is_empty() {
            return;
        }
        expired.sort();

        for (_, key) in expired {
            if let Some(entry) = self.nodes.remove(&key) {
                let index = self.next_index();
                debug!(key = %key, "Lease expired");
                self.notify(WatchEventKind::Expire, entry.to_node(&key), index);
            }
        }
    }
}

/// In-process implementation of [`CoordinationStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    unreachable: AtomicBool,
}

/// Converts a lock poison error to a store error.
fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Internal("memory store lock poisoned".to_string())
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a partition: while set, every operation fails with
    /// `StoreError::Unavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of subscriptions whose receiving side is still alive.
    pub fn watcher_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.watchers.iter().filter(|w| !w.tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unreachable".to_string(),
            ));
        }

        let mut state = self.state.lock().map_err(poison_err)?;
        state.purge_expired(Instant::now());
        Ok(state)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(&self, node: StoreNode) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        if state.nodes.contains_key(&node.key) {
            return Err(StoreError::KeyExists(node.key));
        }

        let index = state.next_index();
        let entry = Entry {
            value: node.value,
            ttl: node.ttl,
            expires_at: node.ttl.map(|ttl| Instant::now() + ttl),
            created_index: index,
            modified_index: index,
        };
        let stored = entry.to_node(&node.key);
        state.nodes.insert(node.key, entry);
        state.notify(WatchEventKind::Create, stored, index);

        Ok(index)
    }

    async fn set(&self, node: StoreNode) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let index = state.next_index();
        let expires_at = node.ttl.map(|ttl| Instant::now() + ttl);

        let (kind, created_index) = match state.nodes.get(&node.key) {
            Some(existing) => (WatchEventKind::Update, existing.created_index),
            None => (WatchEventKind::Create, index),
        };

        let entry = Entry {
            value: node.value,
            ttl: node.ttl,
            expires_at,
            created_index,
            modified_index: index,
        };
        let stored = entry.to_node(&node.key);
        state.nodes.insert(node.key, entry);
        state.notify(kind, stored, index);

        Ok(index)
    }

    async fn compare_and_refresh(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;

        match state.nodes.get(key).map(|entry| entry.value == expected) {
            None => return Err(StoreError::KeyNotFound(key.to_string())),
            Some(false) => return Err(StoreError::ValueMismatch(key.to_string())),
            Some(true) => {}
        }

        let index = state.next_index();
        let refreshed = {
            let entry = state
                .nodes
                .get_mut(key)
                .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            entry.ttl = Some(ttl);
            entry.expires_at = Some(Instant::now() + ttl);
            entry.modified_index = index;
            entry.to_node(key)
        };
        state.notify(WatchEventKind::Update, refreshed, index);

        Ok(index)
    }

    async fn get(&self, key: &str) -> Result<StoreNode, StoreError> {
        let state = self.lock()?;
        state
            .nodes
            .get(key)
            .map(|entry| entry.to_node(key))
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError> {
        let state = self.lock()?;
        let mut entries: Vec<_> = state
            .nodes
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.created_index);

        Ok(entries
            .into_iter()
            .map(|(key, entry)| entry.to_node(key))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let entry = state
            .nodes
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;

        let index = state.next_index();
        state.notify(WatchEventKind::Delete, entry.to_node(key), index);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<(), StoreError> {
        let mut state = self.lock()?;

        match state.nodes.get(key).map(|entry| entry.value == expected) {
            None => return Err(StoreError::KeyNotFound(key.to_string())),
            Some(false) => return Err(StoreError::ValueMismatch(key.to_string())),
            Some(true) => {}
        }

        let entry = state
            .nodes
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
        let index = state.next_index();
        state.notify(WatchEventKind::Delete, entry.to_node(key), index);
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<StoreWatch, StoreError> {
        let mut state = self.lock()?;
        state.next_watch_id += 1;
        let id = state.next_watch_id;

        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.push(Watcher {
            id,
            prefix: prefix.to_string(),
            tx,
        });
        debug!(watch_id = id, prefix = %prefix, "Watch established");

        Ok(StoreWatch::new(id, prefix, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3);

    #[tokio::test]
    async fn test_create_is_create_if_absent() {
        let store = MemoryStore::new();
        store.create(StoreNode::new("/v1/a", "first")).await.unwrap();

        let err = store.create(StoreNode::new("/v1/a", "second")).await.unwrap_err();
        assert_eq!(err, StoreError::KeyExists("/v1/a".to_string()));

        let node = store.get("/v1/a").await.unwrap();
        assert_eq!(node.value, b"first");
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::new();
        store.set(StoreNode::new("/v1/a", "first")).await.unwrap();
        store.set(StoreNode::new("/v1/a", "second")).await.unwrap();

        assert_eq!(store.get("/v1/a").await.unwrap().value, b"second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_leased_node_expires() {
        let store = MemoryStore::new();
        store
            .create(StoreNode::new("/v1/lease", "x").with_ttl(TTL))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get("/v1/lease").await.is_ok());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get("/v1/lease").await.unwrap_err().is_not_found());
        assert!(store.list("/v1/").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_lease() {
        let store = MemoryStore::new();
        store
            .create(StoreNode::new("/v1/lease", "x").with_ttl(TTL))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        store.compare_and_refresh("/v1/lease", b"x", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.get("/v1/lease").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_expiry_fails() {
        let store = MemoryStore::new();
        store
            .create(StoreNode::new("/v1/lease", "x").with_ttl(TTL))
            .await
            .unwrap();

        tokio::time::sleep(TTL).await;
        let err = store.compare_and_refresh("/v1/lease", b"x", TTL).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_refresh_with_foreign_value_fails() {
        let store = MemoryStore::new();
        store
            .create(StoreNode::new("/v1/lease", "mine").with_ttl(TTL))
            .await
            .unwrap();

        let err = store
            .compare_and_refresh("/v1/lease", b"theirs", TTL)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::ValueMismatch("/v1/lease".to_string()));
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_oldest_first() {
        let store = MemoryStore::new();
        store.create(StoreNode::new("/v1/b/2", "two")).await.unwrap();
        store.create(StoreNode::new("/v1/b/1", "one")).await.unwrap();
        store.create(StoreNode::new("/v1/c/1", "other")).await.unwrap();

        let keys: Vec<_> = store
            .list("/v1/b/")
            .await
            .unwrap()
            .into_iter()
            .map(|node| node.key)
            .collect();
        assert_eq!(keys, vec!["/v1/b/2", "/v1/b/1"]);
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let store = MemoryStore::new();
        let err = store.delete("/v1/nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_compare_and_delete_only_removes_expected_value() {
        let store = MemoryStore::new();
        store.create(StoreNode::new("/v1/a", "theirs")).await.unwrap();

        let err = store.compare_and_delete("/v1/a", b"mine").await.unwrap_err();
        assert_eq!(err, StoreError::ValueMismatch("/v1/a".to_string()));
        assert_eq!(store.get("/v1/a").await.unwrap().value, b"theirs");

        store.compare_and_delete("/v1/a", b"theirs").await.unwrap();
        assert!(store.get("/v1/a").await.unwrap_err().is_not_found());
        assert!(store.compare_and_delete("/v1/a", b"theirs").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_watch_delivers_in_index_order() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/v1/tasks/").await.unwrap();

        store.create(StoreNode::new("/v1/tasks/1", "one")).await.unwrap();
        store.create(StoreNode::new("/v1/other/1", "skip")).await.unwrap();
        store.create(StoreNode::new("/v1/tasks/2", "two")).await.unwrap();
        store.delete("/v1/tasks/1").await.unwrap();

        let first = watch.next().await.unwrap();
        let second = watch.next().await.unwrap();
        let third = watch.next().await.unwrap();

        assert_eq!((first.kind, first.node.key.as_str()), (WatchEventKind::Create, "/v1/tasks/1"));
        assert_eq!((second.kind, second.node.key.as_str()), (WatchEventKind::Create, "/v1/tasks/2"));
        assert_eq!((third.kind, third.node.key.as_str()), (WatchEventKind::Delete, "/v1/tasks/1"));
        assert!(first.index < second.index && second.index < third.index);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_expiry() {
        let store = MemoryStore::new();
        let mut watch = store.watch("/v1/lease").await.unwrap();
        store
            .create(StoreNode::new("/v1/lease", "x").with_ttl(TTL))
            .await
            .unwrap();

        tokio::time::sleep(TTL).await;
        // Any operation purges expired nodes.
        let _ = store.list("/").await.unwrap();

        assert_eq!(watch.next().await.unwrap().kind, WatchEventKind::Create);
        assert_eq!(watch.next().await.unwrap().kind, WatchEventKind::Expire);
    }

    #[tokio::test]
    async fn test_dropped_watch_is_unsubscribed() {
        let store = MemoryStore::new();
        let watch = store.watch("/v1/").await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        drop(watch);
        assert_eq!(store.watcher_count(), 0);

        store.create(StoreNode::new("/v1/a", "x")).await.unwrap();
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unreachable(true);

        assert!(matches!(
            store.create(StoreNode::new("/v1/a", "x")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.list("/v1/").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.watch("/v1/").await, Err(StoreError::Unavailable(_))));

        store.set_unreachable(false);
        assert!(store.list("/v1/").await.unwrap().is_empty());
    }
}
