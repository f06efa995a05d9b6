//! Scripted adapter and connector for exercising sessions without a network.
//!
//! Frames understood by [`ScriptedAdapter`] are eight big-endian bytes of
//! message id, optionally followed by `0x01` to request an ack. Build them
//! with [`event_frame`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use danmu_core::adapter::{Adapter, AdapterFactory, ConnectionInfo, EventSink, HeartbeatSpec};
use danmu_core::error::{AdapterError, ConfigError, ConnectionError, DecodeError, HandlerError};
use danmu_core::event::{Chat, EventBody, LiveEvent, User};
use danmu_core::handler::EventHandler;

use crate::connection::{Connection, Connector, Frame};

pub const HEARTBEAT_PAYLOAD: &[u8] = b"hb";

/// Encode a scripted frame carrying one event.
pub fn event_frame(msg_id: u64, want_ack: bool) -> Vec<u8> {
    let mut frame = msg_id.to_be_bytes().to_vec();
    if want_ack {
        frame.push(1);
    }
    frame
}

/// The ack [`ScriptedAdapter`] returns for `msg_id`.
pub fn ack_payload(msg_id: u64) -> Vec<u8> {
    let mut ack = b"ack:".to_vec();
    ack.extend_from_slice(&msg_id.to_be_bytes());
    ack
}

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ─── Adapter ────────────────────────────────────────────────────────────────

pub struct ScriptedAdapter {
    live: AtomicBool,
    liveness_checks: AtomicUsize,
    heartbeat_interval: Mutex<Duration>,
}

impl ScriptedAdapter {
    /// A live stream whose heartbeat is effectively disabled (one hour).
    pub fn new() -> Arc<Self> {
        Self::with_heartbeat(Duration::from_secs(3600))
    }

    pub fn with_heartbeat(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            live: AtomicBool::new(true),
            liveness_checks: AtomicUsize::new(0),
            heartbeat_interval: Mutex::new(interval),
        })
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn liveness_checks(&self) -> usize {
        self.liveness_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn platform(&self) -> &str {
        "scripted"
    }

    async fn connection_info(&self) -> Result<ConnectionInfo, AdapterError> {
        Ok(ConnectionInfo::new("ws://scripted.invalid/push"))
    }

    fn heartbeat_spec(&self) -> HeartbeatSpec {
        HeartbeatSpec {
            interval: *self.heartbeat_interval.lock(),
            payload: HEARTBEAT_PAYLOAD.to_vec(),
        }
    }

    async fn decode_frame(
        &self,
        raw: &[u8],
        sink: &EventSink,
    ) -> Result<Option<Vec<u8>>, DecodeError> {
        let id_bytes: [u8; 8] = raw
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| DecodeError::Frame(format!("short frame ({} bytes)", raw.len())))?;
        let msg_id = u64::from_be_bytes(id_bytes);

        let event = LiveEvent {
            msg_id,
            method: "WebcastChatMessage".into(),
            room_id: 0,
            created_at_ms: None,
            body: EventBody::Chat(Chat {
                user: User::default(),
                content: format!("#{msg_id}"),
                event_time_ms: None,
            }),
        };
        sink.send(event).await.map_err(|_| DecodeError::SinkClosed)?;

        Ok((raw.get(8) == Some(&1)).then(|| ack_payload(msg_id)))
    }

    async fn check_liveness(&self) -> Result<bool, AdapterError> {
        self.liveness_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.live.load(Ordering::SeqCst))
    }
}

/// Hands out one shared [`ScriptedAdapter`]; rejects URLs containing
/// `unsupported`.
pub struct ScriptedAdapterFactory {
    pub adapter: Arc<ScriptedAdapter>,
    created: AtomicUsize,
}

impl ScriptedAdapterFactory {
    pub fn new(adapter: Arc<ScriptedAdapter>) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterFactory for ScriptedAdapterFactory {
    async fn create(&self, url: &str) -> Result<Arc<dyn Adapter>, AdapterError> {
        if url.contains("unsupported") {
            return Err(ConfigError::UnsupportedUrl { url: url.into() }.into());
        }
        // widen the window in which concurrent adds overlap
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.adapter.clone())
    }
}

// ─── Connector ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
    fail_writes: AtomicUsize,
    written: Mutex<Vec<Vec<u8>>>,
    current: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory connector. Every connect yields a fresh connection whose
/// inbound frames are fed with [`ScriptedConnector::push`].
#[derive(Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Successful and failed connect calls so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.shared.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Every payload written successfully, across connections.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().clone()
    }

    /// Deliver a frame to the most recent connection.
    pub fn push(&self, frame: Frame) -> bool {
        match self.shared.current.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _info: &ConnectionInfo) -> Result<Arc<dyn Connection>, ConnectionError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.shared.fail_connects) {
            return Err(ConnectionError::Connect("scripted connect failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.current.lock() = Some(tx);
        Ok(Arc::new(ScriptedConnection {
            inbox: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedConnection {
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: CancellationToken,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn recv(&self) -> Result<Frame, ConnectionError> {
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(ConnectionError::Closed("closed locally".into())),
            next = inbox.recv() => next.ok_or_else(|| ConnectionError::Closed("peer gone".into())),
        }
    }

    async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed("closed locally".into()));
        }
        if take_one(&self.shared.fail_writes) {
            return Err(ConnectionError::Write("scripted write failure".into()));
        }
        self.shared.written.lock().push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// Records the id of every event it sees.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<u64>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ids(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, event: &LiveEvent) -> Result<(), HandlerError> {
        self.seen.lock().push(event.msg_id);
        Ok(())
    }
}

/// Fails every event.
pub struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &LiveEvent) -> Result<(), HandlerError> {
        Err(HandlerError::failed("failing", "scripted failure"))
    }
}
