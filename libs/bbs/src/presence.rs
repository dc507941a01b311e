//! Leased presence for interchangeable service endpoints.
//!
//! A provider registers its address under a TTL-leased key and keeps it alive
//! from a background renewal task:
//! - Renewal runs every `ttl / 3` for as long as the [`PresenceLease`] is held
//! - A failed renewal stops the task; the entry then expires on its own
//! - Releasing (or dropping) the lease deletes the entry right away, unless
//!   another provider has since registered under the same key

use std::sync::Arc;
use std::time::Duration;

use stager_store::{CoordinationStore, StoreNode};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::BbsError;

/// Upper bound on how long deregistration may wait on the store.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live endpoint read from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Provider id, the last segment of the key.
    pub id: String,

    /// Address the provider serves on.
    pub address: String,
}

impl PresenceEntry {
    fn from_node(prefix: &str, node: StoreNode) -> Self {
        let id = node
            .key
            .strip_prefix(prefix)
            .unwrap_or(&node.key)
            .to_string();
        Self {
            id,
            address: String::from_utf8_lossy(&node.value).into_owned(),
        }
    }
}

/// Handle to a registered presence.
///
/// Holding it keeps the entry alive. Dropping it stops renewal and
/// deregisters in the background; [`PresenceLease::release`] does the same
/// and waits for the deletion to finish.
#[derive(Debug)]
pub struct PresenceLease {
    key: String,
    status: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceLease {
    /// Key the presence is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Subscribe to whether the presence is currently held.
    ///
    /// Flips to `false` once renewal fails or the lease is released.
    pub fn status(&self) -> watch::Receiver<bool> {
        self.status.clone()
    }

    /// Returns true while renewal is succeeding.
    pub fn is_held(&self) -> bool {
        *self.status.borrow()
    }

    /// Stop renewing and remove the entry immediately.
    pub async fn release(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(RELEASE_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(key = %self.key, error = %e, "Presence renewal task panicked"),
                Err(_) => warn!(key = %self.key, "Timed out waiting for presence release"),
            }
        }
    }
}

impl Drop for PresenceLease {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Register `value` under `key` and keep it leased until the handle goes away.
pub(crate) async fn maintain_presence(
    store: Arc<dyn CoordinationStore>,
    key: String,
    value: Vec<u8>,
    ttl: Duration,
) -> Result<PresenceLease, BbsError> {
    store
        .set(StoreNode::new(key.clone(), value.clone()).with_ttl(ttl))
        .await?;

    info!(key = %key, ttl_secs = ttl.as_secs_f64(), "Presence registered");

    let (status_tx, status_rx) = watch::channel(true);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(run_renewal_loop(
        store,
        key.clone(),
        value,
        ttl,
        status_tx,
        shutdown_rx,
    ));

    Ok(PresenceLease {
        key,
        status: status_rx,
        shutdown: shutdown_tx,
        handle: Some(handle),
    })
}

/// Point-in-time read of the first live entry under `prefix`.
pub(crate) async fn get_available(
    store: &dyn CoordinationStore,
    prefix: &str,
    service: &'static str,
) -> Result<PresenceEntry, BbsError> {
    store
        .list(prefix)
        .await?
        .into_iter()
        .next()
        .map(|node| PresenceEntry::from_node(prefix, node))
        .ok_or(BbsError::NoPresence { service })
}

fn renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(1))
}

/// Refresh the lease until shutdown or the first failure.
async fn run_renewal_loop(
    store: Arc<dyn CoordinationStore>,
    key: String,
    value: Vec<u8>,
    ttl: Duration,
    status: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(renewal_interval(ttl));
    // The entry was just written; skip the immediate first tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.compare_and_refresh(&key, &value, ttl).await {
                    Ok(index) => debug!(key = %key, index, "Presence renewed"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Presence renewal failed, letting lease expire");
                        let _ = status.send(false);
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Only remove the entry while it is still ours; a newer provider may hold the key.
    match tokio::time::timeout(RELEASE_TIMEOUT, store.compare_and_delete(&key, &value)).await {
        Ok(Ok(())) => info!(key = %key, "Presence released"),
        Ok(Err(e)) if e.is_not_found() => debug!(key = %key, "Presence already gone at release"),
        Ok(Err(e)) if e.is_value_mismatch() => {
            debug!(key = %key, "Presence taken over, leaving new owner's entry")
        }
        Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to delete presence on release"),
        Err(_) => warn!(key = %key, "Timed out deleting presence on release"),
    }
    let _ = status.send(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use stager_store::MemoryStore;

    const PREFIX: &str = "/v1/file_server/";
    const TTL: Duration = Duration::from_secs(3);

    fn key(id: &str) -> String {
        format!("{PREFIX}{id}")
    }

    #[test]
    fn test_renewal_interval_is_a_third_of_ttl() {
        assert_eq!(renewal_interval(Duration::from_secs(9)), Duration::from_secs(3));
        assert_eq!(renewal_interval(Duration::ZERO), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_no_entries_is_no_presence() {
        let store = MemoryStore::new();
        let err = get_available(&store, PREFIX, "file server").await.unwrap_err();
        assert_eq!(err, BbsError::NoPresence { service: "file server" });
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_no_presence() {
        let store = MemoryStore::new();
        store.set_unreachable(true);

        let err = get_available(&store, PREFIX, "file server").await.unwrap_err();
        assert!(matches!(err, BbsError::Store(_)));
        assert!(!err.is_no_presence());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_keeps_entry_past_ttl() {
        let store = Arc::new(MemoryStore::new());
        let lease = maintain_presence(store.clone(), key("abc123"), b"http://fs/".to_vec(), TTL)
            .await
            .unwrap();

        tokio::time::sleep(TTL * 4).await;

        let entry = get_available(&*store, PREFIX, "file server").await.unwrap();
        assert_eq!(entry.id, "abc123");
        assert_eq!(entry.address, "http://fs/");
        assert!(lease.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_removes_entry_immediately() {
        let store = Arc::new(MemoryStore::new());
        let lease = maintain_presence(store.clone(), key("abc123"), b"http://fs/".to_vec(), TTL)
            .await
            .unwrap();
        let status = lease.status();

        lease.release().await;

        assert!(!*status.borrow());
        assert!(get_available(&*store, PREFIX, "file server").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_lease_deregisters() {
        let store = Arc::new(MemoryStore::new());
        let lease = maintain_presence(store.clone(), key("abc123"), b"http://fs/".to_vec(), TTL)
            .await
            .unwrap();
        let mut status = lease.status();

        drop(lease);
        status.changed().await.unwrap();

        assert!(!*status.borrow());
        assert!(store.get(&key("abc123")).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_when_entry_disappears() {
        let store = Arc::new(MemoryStore::new());
        let lease = maintain_presence(store.clone(), key("abc123"), b"http://fs/".to_vec(), TTL)
            .await
            .unwrap();
        let mut status = lease.status();

        store.delete(&key("abc123")).await.unwrap();
        status.changed().await.unwrap();

        assert!(!lease.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_when_entry_is_taken_over() {
        let store = Arc::new(MemoryStore::new());
        let lease = maintain_presence(store.clone(), key("abc123"), b"http://fs/".to_vec(), TTL)
            .await
            .unwrap();
        let mut status = lease.status();

        store
            .set(StoreNode::new(key("abc123"), "http://other/").with_ttl(TTL))
            .await
            .unwrap();
        status.changed().await.unwrap();

        assert!(!lease.is_held());
        // The new owner's entry stays until its own lease runs out.
        let entry = get_available(&*store, PREFIX, "file server").await.unwrap();
        assert_eq!(entry.address, "http://other/");
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_takeover_keeps_new_owner() {
        let store = Arc::new(MemoryStore::new());
        let old = maintain_presence(store.clone(), key("abc123"), b"http://old/".to_vec(), TTL)
            .await
            .unwrap();
        let new = maintain_presence(store.clone(), key("abc123"), b"http://new/".to_vec(), TTL)
            .await
            .unwrap();

        old.release().await;

        assert_eq!(store.get(&key("abc123")).await.unwrap().value, b"http://new/");
        let entry = get_available(&*store, PREFIX, "file server").await.unwrap();
        assert_eq!(entry.address, "http://new/");
        assert!(new.is_held());
    }
}
