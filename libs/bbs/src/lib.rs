//! # stager-bbs
//!
//! The bulletin board: shared state the stager, file servers, and executors
//! coordinate through.
//!
//! ## Roles
//!
//! Each participant sees only the operations it needs:
//! - [`StagerBbs`]: find a file server, desire a task
//! - [`FileServerBbs`]: maintain file server presence
//! - [`ExecutorBbs`]: watch for desired tasks
//!
//! [`Bbs`] implements all three over any [`CoordinationStore`].
//!
//! ## Key Layout
//!
//! - `/v1/file_server/{id}`: leased, value is the server's base address
//! - `/v1/run_once/pending/{guid}`: durable, value is the task's JSON record

mod error;
pub mod presence;
pub mod task_queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stager_models::Task;
use stager_store::CoordinationStore;

pub use error::BbsError;
pub use presence::{PresenceEntry, PresenceLease};
pub use task_queue::{DesiredTaskWatch, DesiredTasks, WatchCanceller};

/// Store key layout.
pub mod keys {
    /// Prefix of file server presence entries.
    pub const FILE_SERVER_PREFIX: &str = "/v1/file_server/";

    /// Prefix of desired task records.
    pub const DESIRED_TASK_PREFIX: &str = "/v1/run_once/pending/";

    pub fn file_server_key(id: &str) -> String {
        format!("{FILE_SERVER_PREFIX}{id}")
    }

    pub fn desired_task_key(guid: &str) -> String {
        format!("{DESIRED_TASK_PREFIX}{guid}")
    }
}

/// Service name reported when no file server is present.
pub const FILE_SERVER_SERVICE: &str = "file server";

/// Operations the stager performs.
#[async_trait]
pub trait StagerBbs: Send + Sync {
    /// Any currently live file server.
    ///
    /// # Errors
    ///
    /// Returns `BbsError::NoPresence` when none is live, and `BbsError::Store`
    /// when the store cannot be read.
    async fn get_available_file_server(&self) -> Result<PresenceEntry, BbsError>;

    /// Publish a task for execution.
    ///
    /// # Errors
    ///
    /// Returns `BbsError::TaskExists` if the guid was already desired.
    async fn desire_task(&self, task: &Task) -> Result<(), BbsError>;
}

/// Operations a file server performs.
#[async_trait]
pub trait FileServerBbs: Send + Sync {
    /// Register `address` as file server `id` and keep it leased for `ttl`.
    async fn maintain_file_server_presence(
        &self,
        ttl: Duration,
        address: &str,
        id: &str,
    ) -> Result<PresenceLease, BbsError>;
}

/// Operations an executor performs.
#[async_trait]
pub trait ExecutorBbs: Send + Sync {
    /// Subscribe to tasks desired from now on.
    async fn watch_for_desired_task(&self) -> Result<DesiredTaskWatch, BbsError>;
}

/// Bulletin board over a coordination store.
#[derive(Clone)]
pub struct Bbs {
    store: Arc<dyn CoordinationStore>,
}

impl Bbs {
    /// Create a bulletin board backed by `store`.
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }
}

impl std::fmt::Debug for Bbs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bbs").finish_non_exhaustive()
    }
}

#[async_trait]
impl StagerBbs for Bbs {
    async fn get_available_file_server(&self) -> Result<PresenceEntry, BbsError> {
        presence::get_available(
            self.store.as_ref(),
            keys::FILE_SERVER_PREFIX,
            FILE_SERVER_SERVICE,
        )
        .await
    }

    async fn desire_task(&self, task: &Task) -> Result<(), BbsError> {
        task_queue::publish(self.store.as_ref(), task).await
    }
}

#[async_trait]
impl FileServerBbs for Bbs {
    async fn maintain_file_server_presence(
        &self,
        ttl: Duration,
        address: &str,
        id: &str,
    ) -> Result<PresenceLease, BbsError> {
        presence::maintain_presence(
            Arc::clone(&self.store),
            keys::file_server_key(id),
            address.as_bytes().to_vec(),
            ttl,
        )
        .await
    }
}

#[async_trait]
impl ExecutorBbs for Bbs {
    async fn watch_for_desired_task(&self) -> Result<DesiredTaskWatch, BbsError> {
        task_queue::watch_for_desired(self.store.as_ref()).await
    }
}
