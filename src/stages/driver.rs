//! `config` stage: describes the driver to the runner.

use serde::Serialize;

use super::StageError;
use crate::config::{ExecutorConfig, JobConfig};

/// Driver name reported to the runner.
pub const DRIVER_NAME: &str = env!("CARGO_PKG_NAME");

/// Driver version reported to the runner.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Driver identification embedded in [`DriverConfig`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DriverInfo {
    /// Driver name.
    pub name: String,
    /// Driver version.
    pub version: String,
}

/// JSON document printed by the `config` stage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct DriverConfig {
    /// Directory the runner clones into on the VM.
    pub builds_dir: String,
    /// Directory the runner keeps its cache in on the VM.
    pub cache_dir: String,
    /// Always `false`: every job gets a fresh VM.
    pub builds_dir_is_shared: bool,
    /// Driver identification.
    pub driver: DriverInfo,
}

impl DriverConfig {
    /// Renders the document as the runner expects it.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Encode`] when serialization fails.
    pub fn to_json(&self) -> Result<String, StageError> {
        serde_json::to_string(self).map_err(|err| StageError::Encode(err.to_string()))
    }
}

/// Builds the `config` stage output. Directories default to
/// `/tmp/build/<job id>` and `/tmp/cache/<job id>`.
///
/// # Errors
///
/// Returns [`StageError::Config`] when a directory has to be derived and
/// the job id is missing.
pub fn driver_config(config: &ExecutorConfig, job: &JobConfig) -> Result<DriverConfig, StageError> {
    let builds_dir = directory(config.builds_dir.as_deref(), "/tmp/build", job)?;
    let cache_dir = directory(config.cache_dir.as_deref(), "/tmp/cache", job)?;
    Ok(DriverConfig {
        builds_dir,
        cache_dir,
        builds_dir_is_shared: false,
        driver: DriverInfo {
            name: DRIVER_NAME.to_owned(),
            version: DRIVER_VERSION.to_owned(),
        },
    })
}

fn directory(configured: Option<&str>, root: &str, job: &JobConfig) -> Result<String, StageError> {
    if let Some(dir) = configured.map(str::trim).filter(|dir| !dir.is_empty()) {
        return Ok(dir.to_owned());
    }
    Ok(format!("{root}/{}", job.job_id()?))
}
