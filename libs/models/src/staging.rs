//! Staging request and response types.

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// An operator-installed buildpack made available to every staging run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminBuildpack {
    /// Buildpack key; also the directory name the buildpack is unpacked into.
    pub key: String,

    /// Location the buildpack archive is downloaded from.
    pub url: String,
}

impl AdminBuildpack {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }
}

/// A single `NAME=value` pair.
///
/// Encoded on the wire as a two-element array, `["NAME", "value"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl From<(String, String)> for EnvironmentVariable {
    fn from((name, value): (String, String)) -> Self {
        Self { name, value }
    }
}

impl From<EnvironmentVariable> for (String, String) {
    fn from(var: EnvironmentVariable) -> Self {
        (var.name, var.value)
    }
}

/// A request to stage (build) an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRequest {
    /// Application being staged.
    pub app_id: String,

    /// Identifier of this staging attempt.
    pub task_id: String,

    /// Location of the application source artifact.
    pub download_uri: String,

    /// Target platform stack; selects the compiler.
    pub stack: String,

    /// Memory reservation in megabytes.
    pub memory_mb: u32,

    /// Disk reservation in megabytes.
    pub disk_mb: u32,

    /// Admin buildpacks, in the order the caller supplied them.
    #[serde(default)]
    pub admin_buildpacks: Vec<AdminBuildpack>,

    /// Environment for the compiler, in the order the caller supplied it.
    #[serde(default)]
    pub environment: Vec<EnvironmentVariable>,
}

impl StagingRequest {
    /// Guid of the task published for this request: `{app_id}-{task_id}`.
    pub fn task_guid(&self) -> String {
        format!("{}-{}", self.app_id, self.task_id)
    }

    /// Check the request is well-formed before it reaches the stager.
    ///
    /// Returns the first field that fails.
    pub fn validate(&self) -> Result<(), ModelError> {
        let required = [
            ("app_id", &self.app_id),
            ("task_id", &self.task_id),
            ("download_uri", &self.download_uri),
            ("stack", &self.stack),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ModelError::validation(field, "must not be empty"));
            }
        }

        if self.memory_mb == 0 {
            return Err(ModelError::validation("memory_mb", "must be positive"));
        }
        if self.disk_mb == 0 {
            return Err(ModelError::validation("disk_mb", "must be positive"));
        }

        for (i, buildpack) in self.admin_buildpacks.iter().enumerate() {
            if buildpack.key.trim().is_empty() {
                return Err(ModelError::validation(
                    format!("admin_buildpacks[{i}].key"),
                    "must not be empty",
                ));
            }
            if buildpack.key.contains('/') || buildpack.key.contains(',') {
                return Err(ModelError::validation(
                    format!("admin_buildpacks[{i}].key"),
                    "must not contain '/' or ','",
                ));
            }
        }

        Ok(())
    }
}

/// Outcome of a staging submission reported back to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingResponse {
    /// Guid of the published task, when staging was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// Error message, when staging was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StagingResponse {
    pub fn accepted(guid: impl Into<String>) -> Self {
        Self {
            guid: Some(guid.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            guid: None,
            error: Some(error.into()),
        }
    }
}
