//! Registry lifecycle tests against the scripted adapter and connector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use danmu_core::config::StreamConfig;
use danmu_core::error::HandlerError;
use danmu_core::handler::{EventHandler, HandlerFactory};
use danmu_core::policy::ReconnectPolicy;
use danmu_core::store::MemoryConfigStore;
use danmu_registry::{
    BuildError, ControlService, DefaultSessionFactory, RegistryError, SessionFactory,
    TaskOutcome, TaskRegistry,
};
use danmu_ws::testkit::{
    event_frame, wait_until, RecordingHandler, ScriptedAdapter, ScriptedAdapterFactory,
    ScriptedConnector,
};
use danmu_ws::{Frame, Session, SessionOptions, SessionState};

const WAIT: Duration = Duration::from_secs(3);

struct Harness {
    registry: Arc<TaskRegistry>,
    adapters: Arc<ScriptedAdapterFactory>,
    connector: Arc<ScriptedConnector>,
}

fn options() -> SessionOptions {
    SessionOptions {
        event_capacity: 16,
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(1),
        connect_policy: ReconnectPolicy::fixed(1, Duration::from_millis(10)),
        retry_pause: Duration::from_millis(20),
        recover_policy: ReconnectPolicy::fixed(3, Duration::ZERO),
    }
}

fn harness() -> Harness {
    harness_with(None)
}

fn harness_with(handlers: Option<Arc<dyn HandlerFactory>>) -> Harness {
    let adapters = ScriptedAdapterFactory::new(ScriptedAdapter::new());
    let connector = ScriptedConnector::new();
    let mut factory = DefaultSessionFactory::new(adapters.clone(), connector.clone(), options());
    if let Some(handlers) = handlers {
        factory = factory.with_handlers(handlers);
    }
    Harness {
        registry: Arc::new(TaskRegistry::new(Arc::new(factory))),
        adapters,
        connector,
    }
}

fn config(id: i64, room: &str) -> StreamConfig {
    StreamConfig::new(id, format!("https://live.example/{room}"))
}

async fn streaming(h: &Harness, id: i64) -> bool {
    let session = h.registry.get(id).unwrap().session;
    wait_until(WAIT, || session.state() == SessionState::Streaming).await
}

#[tokio::test]
async fn concurrent_adds_build_one_session() {
    let h = harness();
    let cfg = config(1, "100");

    let results = futures::future::join_all((0..16).map(|_| h.registry.add(cfg.clone()))).await;

    let added = results
        .iter()
        .filter(|r| matches!(r, Ok(TaskOutcome::Added)))
        .count();
    let existing = results
        .iter()
        .filter(|r| matches!(r, Ok(TaskOutcome::AlreadyExists)))
        .count();
    assert_eq!(added, 1);
    assert_eq!(existing, 15);
    assert_eq!(h.adapters.created(), 1);
    assert_eq!(h.registry.len(), 1);

    assert!(streaming(&h, 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.connector.connects(), 1);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn concurrent_adds_across_tasks() {
    let h = harness();
    let mut joins = Vec::new();
    for id in 0..8 {
        for _ in 0..2 {
            let registry = h.registry.clone();
            joins.push(tokio::spawn(async move {
                registry.add(config(id, &id.to_string())).await
            }));
        }
    }
    let mut added = 0;
    for join in joins {
        if matches!(join.await.unwrap(), Ok(TaskOutcome::Added)) {
            added += 1;
        }
    }
    assert_eq!(added, 8);
    assert_eq!(h.registry.ids(), (0..8).collect::<Vec<_>>());
    assert_eq!(h.adapters.created(), 8);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn update_with_same_url_keeps_connection() {
    let h = harness();
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);
    let before = h.registry.get(1).unwrap().session;

    let mut renamed = config(1, "100");
    renamed.name = "renamed".into();
    assert_eq!(
        h.registry.update(renamed).await.unwrap(),
        TaskOutcome::Updated
    );

    let task = h.registry.get(1).unwrap();
    assert!(task.session.same_as(&before));
    assert_eq!(task.config.name, "renamed");
    assert_eq!(task.session.state(), SessionState::Streaming);
    assert_eq!(h.connector.connects(), 1);

    // disabling through update only flips the flag
    assert_eq!(
        h.registry
            .update(config(1, "100").with_enabled(false))
            .await
            .unwrap(),
        TaskOutcome::Updated
    );
    let task = h.registry.get(1).unwrap();
    assert!(task.session.same_as(&before));
    assert!(!task.session.is_enabled());
    assert_eq!(h.connector.connects(), 1);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn update_with_new_url_replaces_session() {
    let h = harness();
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);
    let old = h.registry.get(1).unwrap().session;

    assert_eq!(
        h.registry.update(config(1, "200")).await.unwrap(),
        TaskOutcome::Replaced
    );

    let task = h.registry.get(1).unwrap();
    assert!(!task.session.same_as(&old));
    assert_eq!(task.session.url(), "https://live.example/200");
    assert_eq!(old.state(), SessionState::Stopped);
    assert!(streaming(&h, 1).await);
    assert_eq!(h.connector.connects(), 2);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn failed_replacement_keeps_old_task() {
    let h = harness();
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);
    let old = h.registry.get(1).unwrap().session;

    let err = h
        .registry
        .update(StreamConfig::new(1, "https://unsupported.example/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Build { id: 1, .. }));

    let task = h.registry.get(1).unwrap();
    assert!(task.session.same_as(&old));
    assert_eq!(task.session.state(), SessionState::Streaming);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let h = harness();
    assert_eq!(h.registry.delete(42).await.unwrap(), TaskOutcome::NotFound);
    assert_eq!(h.registry.stop(42).await.unwrap(), TaskOutcome::NotFound);
    assert_eq!(
        h.registry.update(config(42, "1")).await.unwrap(),
        TaskOutcome::NotFound
    );
}

#[tokio::test]
async fn delete_stops_and_forgets() {
    let h = harness();
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);
    let session = h.registry.get(1).unwrap().session;

    assert_eq!(h.registry.delete(1).await.unwrap(), TaskOutcome::Deleted);
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.delete(1).await.unwrap(), TaskOutcome::NotFound);

    // the id is free again
    assert_eq!(
        h.registry.add(config(1, "100")).await.unwrap(),
        TaskOutcome::Added
    );
    h.registry.shutdown().await;
}

#[tokio::test]
async fn failed_add_leaves_no_placeholder() {
    let h = harness();
    let err = h
        .registry
        .add(StreamConfig::new(5, "https://unsupported.example/5"))
        .await
        .unwrap_err();
    assert_eq!(err.task_id(), 5);
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.delete(5).await.unwrap(), TaskOutcome::NotFound);

    assert_eq!(
        h.registry.add(config(5, "500")).await.unwrap(),
        TaskOutcome::Added
    );
    h.registry.shutdown().await;
}

#[tokio::test]
async fn disabled_config_is_registered_but_idle() {
    let h = harness();
    h.registry
        .add(config(1, "100").with_enabled(false))
        .await
        .unwrap();
    let task = h.registry.get(1).unwrap();
    assert!(!task.session.is_enabled());
    assert_eq!(task.session.state(), SessionState::Idle);
    assert_eq!(h.connector.connects(), 0);

    h.registry.update(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn stop_keeps_task_registered() {
    let h = harness();
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);

    assert_eq!(h.registry.stop(1).await.unwrap(), TaskOutcome::Stopped);
    assert_eq!(h.registry.stop(1).await.unwrap(), TaskOutcome::Stopped);
    let task = h.registry.get(1).unwrap();
    assert_eq!(task.session.state(), SessionState::Stopped);
    assert!(!task.session.is_enabled());

    h.registry.shutdown().await;
}

#[tokio::test]
async fn init_from_store_and_shutdown() {
    let h = harness();
    let store = MemoryConfigStore::new(vec![
        config(1, "100"),
        config(2, "200").with_enabled(false),
        StreamConfig::new(3, "https://unsupported.example/3"),
    ]);

    assert_eq!(h.registry.init_from(&store).await.unwrap(), 2);
    assert_eq!(h.registry.ids(), vec![1, 2]);
    assert!(streaming(&h, 1).await);

    let sessions: Vec<_> = h
        .registry
        .ids()
        .into_iter()
        .filter_map(|id| h.registry.get(id))
        .map(|t| t.session)
        .collect();
    h.registry.shutdown().await;

    assert!(h.registry.is_empty());
    assert!(sessions.iter().all(|s| s.state() == SessionState::Stopped));
}

struct Recorders(Arc<RecordingHandler>);

impl HandlerFactory for Recorders {
    fn handlers_for(
        &self,
        _config: &StreamConfig,
    ) -> Result<Vec<Arc<dyn EventHandler>>, HandlerError> {
        let handler: Arc<dyn EventHandler> = self.0.clone();
        Ok(vec![handler])
    }
}

#[tokio::test]
async fn factory_wires_handlers() {
    let rec = RecordingHandler::new();
    let handlers: Arc<dyn HandlerFactory> = Arc::new(Recorders(rec.clone()));
    let h = harness_with(Some(handlers));
    h.registry.add(config(1, "100")).await.unwrap();
    assert!(streaming(&h, 1).await);

    h.connector.push(Frame::Binary(event_frame(77, false)));
    assert!(wait_until(WAIT, || rec.ids() == vec![77]).await);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn control_service_codes() {
    let h = harness();
    let control = ControlService::new(h.registry.clone());

    let added = control.add_task(config(1, "100")).await;
    assert_eq!(added.code, 200);
    assert_eq!(added.message, "task added");
    assert!(control.add_task(config(1, "100")).await.is_ok());

    assert_eq!(control.update_task(config(9, "900")).await.code, 404);
    let bad = control
        .add_task(StreamConfig::new(2, "https://unsupported.example/2"))
        .await;
    assert_eq!(bad.code, 400);
    assert!(bad.message.contains("unsupported"));

    assert_eq!(control.stop_task(1).await.code, 200);
    assert_eq!(control.delete_task(1).await.code, 200);
    assert_eq!(control.delete_task(1).await.code, 404);

    let json = serde_json::to_value(control.delete_task(1).await).unwrap();
    assert_eq!(json["code"], 404);
}

/// Holds the build of one task id until released.
struct GatedFactory {
    inner: DefaultSessionFactory,
    held: i64,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl SessionFactory for GatedFactory {
    async fn build(&self, config: &StreamConfig) -> Result<Session, BuildError> {
        if config.id == self.held {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.build(config).await
    }
}

#[tokio::test]
async fn slow_build_does_not_block_other_tasks() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let factory = GatedFactory {
        inner: DefaultSessionFactory::new(
            ScriptedAdapterFactory::new(ScriptedAdapter::new()),
            ScriptedConnector::new(),
            options(),
        ),
        held: 1,
        entered: entered.clone(),
        release: release.clone(),
    };
    let registry = Arc::new(TaskRegistry::new(Arc::new(factory)));

    let slow = tokio::spawn({
        let registry = registry.clone();
        async move { registry.add(config(1, "100")).await }
    });
    tokio::time::timeout(WAIT, entered.notified()).await.unwrap();

    let fast = tokio::time::timeout(Duration::from_secs(1), async {
        let added = registry.add(config(2, "200")).await?;
        let updated = registry
            .update(config(2, "200").with_enabled(false))
            .await?;
        let deleted = registry.delete(2).await?;
        let duplicate = registry.add(config(1, "100")).await?;
        Ok::<_, RegistryError>((added, updated, deleted, duplicate))
    })
    .await
    .expect("operations on other ids must not wait for the held build")
    .unwrap();
    assert_eq!(
        fast,
        (
            TaskOutcome::Added,
            TaskOutcome::Updated,
            TaskOutcome::Deleted,
            TaskOutcome::AlreadyExists
        )
    );
    assert!(!slow.is_finished());

    release.notify_one();
    assert_eq!(slow.await.unwrap().unwrap(), TaskOutcome::Added);
    assert_eq!(registry.ids(), vec![1]);
    registry.shutdown().await;
}
