//! The task registry.
//!
//! Two maps live under one structural lock: id → task and id → per-task
//! lock. The structural lock is a short `parking_lot::RwLock` that is never
//! held across an await. Slow work (building a session, starting or
//! stopping it) happens under the per-task `tokio` mutex only, so operations
//! on different ids never wait on each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use danmu_core::config::{StreamConfig, TaskId};
use danmu_core::error::StoreError;
use danmu_core::store::ConfigStore;
use danmu_ws::Session;

use crate::error::RegistryError;
use crate::factory::SessionFactory;

/// One supervised stream.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    /// The config the session was last built or updated from.
    pub config: StreamConfig,
    pub session: Session,
}

/// Result of a registry operation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Added,
    AlreadyExists,
    /// Same URL; only the enabled flag / config snapshot changed.
    Updated,
    /// URL changed; the session was rebuilt.
    Replaced,
    Deleted,
    Stopped,
    NotFound,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "task added"),
            Self::AlreadyExists => write!(f, "task already exists"),
            Self::Updated => write!(f, "task updated"),
            Self::Replaced => write!(f, "task replaced"),
            Self::Deleted => write!(f, "task deleted"),
            Self::Stopped => write!(f, "task stopped"),
            Self::NotFound => write!(f, "task not found"),
        }
    }
}

#[derive(Default)]
struct Maps {
    tasks: HashMap<TaskId, Task>,
    locks: HashMap<TaskId, Arc<Mutex<()>>>,
}

/// Concurrent supervisor of sessions keyed by task id.
///
/// # Thread Safety
/// Share it behind an `Arc`. Every operation takes `&self`.
pub struct TaskRegistry {
    maps: RwLock<Maps>,
    factory: Arc<dyn SessionFactory>,
}

impl TaskRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            factory,
        }
    }

    /// Add every config from `store`. Individual failures are logged and
    /// skipped. Returns how many tasks were added.
    pub async fn init_from(&self, store: &dyn ConfigStore) -> Result<usize, StoreError> {
        let configs = store.all_configs().await?;
        let total = configs.len();
        let mut added = 0;
        for config in configs {
            match self.add(config).await {
                Ok(TaskOutcome::Added) => added += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(task_id = e.task_id(), error = %e, "skipping task"),
            }
        }
        tracing::info!(added, total, "registry initialised");
        Ok(added)
    }

    /// Register and (if enabled) start a task. Adding an id that is already
    /// present, or being added concurrently, is a no-op.
    pub async fn add(&self, config: StreamConfig) -> Result<TaskOutcome, RegistryError> {
        let id = config.id;
        if self.contains(id) {
            return Ok(TaskOutcome::AlreadyExists);
        }

        let _guard = {
            let mut maps = self.maps.write();
            if maps.tasks.contains_key(&id) || maps.locks.contains_key(&id) {
                return Ok(TaskOutcome::AlreadyExists);
            }
            let lock = Arc::new(Mutex::new(()));
            let Ok(guard) = Arc::clone(&lock).try_lock_owned() else {
                return Ok(TaskOutcome::AlreadyExists);
            };
            maps.locks.insert(id, lock);
            guard
        };

        let session = match self.factory.build(&config).await {
            Ok(session) => session,
            Err(source) => {
                self.maps.write().locks.remove(&id);
                tracing::warn!(task_id = id, url = %config.url, error = %source, "task not added");
                return Err(RegistryError::Build { id, source });
            }
        };

        let enabled = config.enabled;
        tracing::info!(task_id = id, url = %config.url, enabled, "task added");
        self.maps.write().tasks.insert(
            id,
            Task {
                id,
                config,
                session: session.clone(),
            },
        );
        if enabled {
            session.start().await;
        }
        Ok(TaskOutcome::Added)
    }

    /// Apply a new config to an existing task.
    ///
    /// With the same URL only the enabled flag is applied and the connection
    /// is left alone. A changed URL builds a new session first; if that
    /// fails the old task keeps running untouched.
    pub async fn update(&self, config: StreamConfig) -> Result<TaskOutcome, RegistryError> {
        let id = config.id;
        let Some(_guard) = self.lock_task(id).await else {
            return Ok(TaskOutcome::NotFound);
        };
        let Some(current) = self.get(id) else {
            return Ok(TaskOutcome::NotFound);
        };

        if current.config.url == config.url {
            current.session.set_enable(config.enabled).await;
            tracing::info!(task_id = id, enabled = config.enabled, "task updated");
            self.maps.write().tasks.insert(
                id,
                Task {
                    id,
                    config,
                    session: current.session,
                },
            );
            return Ok(TaskOutcome::Updated);
        }

        let session = self
            .factory
            .build(&config)
            .await
            .map_err(|source| RegistryError::Build { id, source })?;

        current.session.stop().await;
        let enabled = config.enabled;
        tracing::info!(task_id = id, from = %current.config.url, to = %config.url, "task replaced");
        self.maps.write().tasks.insert(
            id,
            Task {
                id,
                config,
                session: session.clone(),
            },
        );
        if enabled {
            session.start().await;
        }
        Ok(TaskOutcome::Replaced)
    }

    /// Stop and forget a task.
    pub async fn delete(&self, id: TaskId) -> Result<TaskOutcome, RegistryError> {
        let Some(_guard) = self.lock_task(id).await else {
            return Ok(TaskOutcome::NotFound);
        };
        let task = {
            let mut maps = self.maps.write();
            maps.locks.remove(&id);
            maps.tasks.remove(&id)
        };
        match task {
            Some(task) => {
                task.session.stop().await;
                tracing::info!(task_id = id, "task deleted");
                Ok(TaskOutcome::Deleted)
            }
            None => Ok(TaskOutcome::NotFound),
        }
    }

    /// Stop a task's session but keep it registered.
    pub async fn stop(&self, id: TaskId) -> Result<TaskOutcome, RegistryError> {
        let Some(_guard) = self.lock_task(id).await else {
            return Ok(TaskOutcome::NotFound);
        };
        match self.get(id) {
            Some(task) => {
                task.session.stop().await;
                Ok(TaskOutcome::Stopped)
            }
            None => Ok(TaskOutcome::NotFound),
        }
    }

    /// Stop every session and empty the registry.
    pub async fn shutdown(&self) {
        let ids = self.ids();
        for id in &ids {
            if let Err(e) = self.delete(*id).await {
                tracing::warn!(task_id = id, error = %e, "delete during shutdown failed");
            }
        }
        tracing::info!(tasks = ids.len(), "registry shut down");
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.maps.read().tasks.get(&id).cloned()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.maps.read().tasks.contains_key(&id)
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.maps.read().tasks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.maps.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the per-task lock for `id`, or `None` if the id is unknown.
    ///
    /// The lock found in the map may be retired (task deleted, or re-added
    /// with a fresh lock) while we wait on it, so ownership is re-checked
    /// after acquiring.
    async fn lock_task(&self, id: TaskId) -> Option<OwnedMutexGuard<()>> {
        loop {
            let lock = self.maps.read().locks.get(&id).cloned()?;
            let guard = Arc::clone(&lock).lock_owned().await;
            match self.maps.read().locks.get(&id) {
                Some(current) if Arc::ptr_eq(current, &lock) => return Some(guard),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.ids())
            .finish()
    }
}
