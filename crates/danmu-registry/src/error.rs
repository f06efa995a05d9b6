//! Registry error types.

use thiserror::Error;

use danmu_core::config::TaskId;
use danmu_core::error::{AdapterError, ConfigError, HandlerError};

/// Why a session could not be built from a config.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Registry operation failures. Missing or duplicate ids are reported as
/// [`crate::TaskOutcome`] values, not errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {id}: cannot build session: {source}")]
    Build {
        id: TaskId,
        #[source]
        source: BuildError,
    },
}

impl RegistryError {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Build { id, .. } => *id,
        }
    }
}
