//! The stager.
//!
//! Turns a staging request into a desired task:
//! 1. Pick any live file server
//! 2. Resolve the compiler for the request's stack
//! 3. Build the action plan and the task around it
//! 4. Publish the task to the desired-task queue
//!
//! Each call is independent. Nothing is retried here; a caller that sees
//! [`StagerError::ServiceUnavailable`] may try again once a file server
//! registers.

use std::sync::Arc;

use stager_bbs::{BbsError, StagerBbs};
use stager_models::{LogConfig, StagingRequest, Task, LOG_SOURCE_STAGING};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::compilers::CompilerMapping;
use crate::plan;

/// Why a staging request could not be turned into a task.
#[derive(Debug, Error)]
pub enum StagerError {
    /// No file server is currently present.
    #[error("No available file server present")]
    ServiceUnavailable,

    /// The request's stack has no compiler configured.
    #[error("No compiler defined for requested stack")]
    Configuration { stack: String },

    /// The bulletin board failed; propagated unchanged.
    #[error(transparent)]
    Bbs(#[from] BbsError),
}

impl StagerError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StagerError::ServiceUnavailable | StagerError::Bbs(BbsError::Store(_))
        )
    }
}

/// Stager bound to a bulletin board and a compiler mapping.
pub struct Stager {
    bbs: Arc<dyn StagerBbs>,
    compilers: CompilerMapping,
}

impl Stager {
    pub fn new(bbs: Arc<dyn StagerBbs>, compilers: CompilerMapping) -> Self {
        Self { bbs, compilers }
    }

    pub fn compilers(&self) -> &CompilerMapping {
        &self.compilers
    }

    /// Stage `request`, asking for the outcome to be reported to `reply_to`.
    ///
    /// Returns once the task has been published. Nothing is published when
    /// this returns an error.
    #[instrument(
        skip(self, request),
        fields(app_id = %request.app_id, task_id = %request.task_id, stack = %request.stack)
    )]
    pub async fn stage(&self, request: &StagingRequest, reply_to: &str) -> Result<(), StagerError> {
        let file_server = match self.bbs.get_available_file_server().await {
            Ok(file_server) => file_server,
            Err(e) if e.is_no_presence() => {
                warn!("No file server present, rejecting staging request");
                return Err(StagerError::ServiceUnavailable);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(compiler) = self.compilers.compiler_for(&request.stack) else {
            warn!("No compiler configured for stack");
            return Err(StagerError::Configuration {
                stack: request.stack.clone(),
            });
        };

        let task = staging_task(request, reply_to, &file_server.address, compiler);
        self.bbs.desire_task(&task).await?;

        info!(
            guid = %task.guid,
            file_server = %file_server.id,
            compiler,
            actions = task.actions.len(),
            "Staging task desired"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Stager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stager")
            .field("compilers", &self.compilers)
            .finish_non_exhaustive()
    }
}

fn staging_task(
    request: &StagingRequest,
    reply_to: &str,
    file_server_url: &str,
    compiler: &str,
) -> Task {
    Task {
        guid: request.task_guid(),
        reply_to: reply_to.to_string(),
        stack: request.stack.clone(),
        memory_mb: request.memory_mb,
        disk_mb: request.disk_mb,
        log: LogConfig {
            guid: request.app_id.clone(),
            source_name: LOG_SOURCE_STAGING.to_string(),
            index: None,
        },
        actions: plan::build_actions(request, file_server_url, compiler),
    }
}
