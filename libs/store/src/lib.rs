//! # stager-store
//!
//! The coordination substrate presence and the task queue are built on.
//!
//! A store must provide:
//! - Leased keys: a node written with a TTL disappears unless refreshed
//! - Atomic create-if-absent: no partial or duplicate records
//! - Ordered watches: every change under a prefix is delivered to each
//!   active subscriber exactly once, in modification-index order
//!
//! [`MemoryStore`] implements the contract in process. It backs the tests and
//! the service's development mode; a networked store plugs in behind the same
//! [`CoordinationStore`] trait.

mod error;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use error::StoreError;
pub use memory::MemoryStore;

/// A keyed record in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNode {
    /// Full key, e.g. `/v1/file_server/abc123`.
    pub key: String,

    /// Opaque value.
    pub value: Vec<u8>,

    /// Lease TTL; `None` for durable nodes.
    pub ttl: Option<Duration>,

    /// Modification index assigned by the store (0 on input).
    pub index: u64,
}

impl StoreNode {
    /// A durable node.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl: None,
            index: 0,
        }
    }

    /// Lease the node for `ttl`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Kind of change reported by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Update,
    Delete,
    Expire,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,

    /// The node after the change (or as it was, for deletes and expiries).
    pub node: StoreNode,

    /// Store index at which the change happened.
    pub index: u64,

    pub occurred_at: DateTime<Utc>,
}

/// An active watch subscription.
///
/// Dropping it ends the subscription; the store stops delivering to it on
/// the next change without waiting on the subscriber.
#[derive(Debug)]
pub struct StoreWatch {
    id: u64,
    prefix: String,
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl StoreWatch {
    pub fn new(id: u64, prefix: impl Into<String>, events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self {
            id,
            prefix: prefix.into(),
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Wait for the next change. Returns `None` once the store goes away.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

/// Operations the stager core needs from its coordination store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically create a node.
    ///
    /// Returns the node's modification index.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyExists` if a live node holds the key.
    async fn create(&self, node: StoreNode) -> Result<u64, StoreError>;

    /// Create or overwrite a node.
    async fn set(&self, node: StoreNode) -> Result<u64, StoreError>;

    /// Renew a leased node for another `ttl`, provided it still holds `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` if the node expired or was deleted and
    /// `StoreError::ValueMismatch` if someone else rewrote it.
    async fn compare_and_refresh(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    /// Read a live node.
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError>;

    /// List live nodes under `prefix`, oldest first.
    async fn list(&self, prefix: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Remove a node.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove a node only if it still holds `expected`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyNotFound` if the node is gone and
    /// `StoreError::ValueMismatch` if someone else rewrote it; the node is
    /// left untouched in that case.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<(), StoreError>;

    /// Subscribe to every change under `prefix` from now on.
    async fn watch(&self, prefix: &str) -> Result<StoreWatch, StoreError>;
}
