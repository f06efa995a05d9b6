//! Status-code facade over the registry for an RPC or HTTP layer.

use std::sync::Arc;

use serde::Serialize;

use danmu_core::config::{StreamConfig, TaskId};

use crate::error::RegistryError;
use crate::registry::{TaskOutcome, TaskRegistry};

pub const CODE_OK: u16 = 200;
pub const CODE_BAD_REQUEST: u16 = 400;
pub const CODE_NOT_FOUND: u16 = 404;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub code: u16,
    pub message: String,
}

impl ControlResponse {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

impl From<Result<TaskOutcome, RegistryError>> for ControlResponse {
    fn from(result: Result<TaskOutcome, RegistryError>) -> Self {
        match result {
            Ok(TaskOutcome::NotFound) => Self {
                code: CODE_NOT_FOUND,
                message: TaskOutcome::NotFound.to_string(),
            },
            Ok(outcome) => Self {
                code: CODE_OK,
                message: outcome.to_string(),
            },
            Err(e) => Self {
                code: CODE_BAD_REQUEST,
                message: e.to_string(),
            },
        }
    }
}

/// Task control entry points, one per remote call.
#[derive(Clone)]
pub struct ControlService {
    registry: Arc<TaskRegistry>,
}

impl ControlService {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub async fn add_task(&self, config: StreamConfig) -> ControlResponse {
        self.registry.add(config).await.into()
    }

    pub async fn update_task(&self, config: StreamConfig) -> ControlResponse {
        self.registry.update(config).await.into()
    }

    pub async fn delete_task(&self, id: TaskId) -> ControlResponse {
        self.registry.delete(id).await.into()
    }

    pub async fn stop_task(&self, id: TaskId) -> ControlResponse {
        self.registry.stop(id).await.into()
    }
}
