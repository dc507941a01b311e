//! Task (RunOnce) and executor action definitions.
//!
//! A task is the unit of work published to the queue. Executors run its
//! actions strictly in order; later actions depend on paths produced by
//! earlier ones.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EnvironmentVariable, ModelError};

/// Log source tag for output produced while staging.
pub const LOG_SOURCE_STAGING: &str = "STG";

/// Describes the log stream a task's output belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Guid the log lines are attributed to (the application).
    pub guid: String,

    /// Producer tag for the stream.
    pub source_name: String,

    /// Instance index; absent for staging.
    #[serde(default)]
    pub index: Option<u32>,
}

/// A published unit of work executed once by a remote worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier of this staging attempt.
    pub guid: String,

    /// Opaque caller-supplied address the result is delivered to.
    pub reply_to: String,

    /// Target platform stack.
    pub stack: String,

    /// Memory reservation in megabytes.
    pub memory_mb: u32,

    /// Disk reservation in megabytes.
    pub disk_mb: u32,

    /// Log stream descriptor.
    pub log: LogConfig,

    /// Ordered action plan.
    pub actions: Vec<ExecutorAction>,
}

impl Task {
    /// Encode the task as its stored JSON record.
    pub fn to_json(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a task from its stored JSON record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A single step of a task's action plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "snake_case")]
pub enum ExecutorAction {
    Download(DownloadAction),
    Run(RunAction),
    Upload(UploadAction),
    FetchResult(FetchResultAction),
}

impl ExecutorAction {
    /// Download `from` into `to`, unpacking the archive when `extract` is set.
    pub fn download(from: impl Into<String>, to: impl Into<String>, extract: bool) -> Self {
        Self::Download(DownloadAction {
            from: from.into(),
            to: to.into(),
            extract,
        })
    }

    /// Run `script` with `env` under a hard wall-clock `timeout`.
    pub fn run(script: impl Into<String>, env: Vec<EnvironmentVariable>, timeout: Duration) -> Self {
        Self::Run(RunAction {
            script: script.into(),
            env,
            timeout,
        })
    }

    /// Upload the local file `from` to `to`.
    pub fn upload(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Upload(UploadAction {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Read the result descriptor at `file`.
    pub fn fetch_result(file: impl Into<String>) -> Self {
        Self::FetchResult(FetchResultAction { file: file.into() })
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Download(_) => "download",
            Self::Run(_) => "run",
            Self::Upload(_) => "upload",
            Self::FetchResult(_) => "fetch_result",
        }
    }
}

/// Fetch an artifact and optionally unpack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadAction {
    pub from: String,
    pub to: String,
    pub extract: bool,
}

/// Execute a script with an environment and a hard time limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAction {
    pub script: String,
    pub env: Vec<EnvironmentVariable>,
    #[serde(with = "duration_nanos")]
    pub timeout: Duration,
}

/// Push a local artifact to a remote location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAction {
    pub from: String,
    pub to: String,
}

/// Read a result descriptor produced by a run, to report back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResultAction {
    pub file: String,
}

/// Durations travel as integer nanoseconds.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = u64::try_from(duration.as_nanos()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
