//! Per-stream session: the protocol state machine.
//!
//! A session is gated by two flags. `enabled` is operator intent (start,
//! stop, set_enable) and `live` is the result of the last liveness probe.
//! Only while both hold does the streaming loop run:
//!
//! ```text
//!  Idle ──probe──▶ Checking ──live──▶ Connecting ──ok──▶ Streaming
//!   ▲                 │                   │                 │
//!   └────not live─────┘        fail: pause, retry      any activity exits
//!                                                           │
//!                               re-probe, loop ◀── Disconnected
//! ```
//!
//! While streaming, three activities share a per-attempt cancellation token
//! and a bounded event channel:
//! - heartbeat: writes the adapter's keep-alive frame on its interval
//! - fetch: reads frames, decodes them into the channel, writes acks
//! - dispatch: hands events to subscribed handlers in arrival order
//!
//! Whichever activity ends first cancels the token, unwinding the other two.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use danmu_core::adapter::{Adapter, EventSink};
use danmu_core::config::{Schedule, StreamConfig, TaskId};
use danmu_core::error::{ConfigError, ConnectionError, DecodeError};
use danmu_core::event::LiveEvent;
use danmu_core::handler::{Dispatcher, EventHandler};
use danmu_core::policy::ReconnectPolicy;

use crate::connection::{Connection, ConnectionSlot, Connector, Frame};
use crate::scheduler::Scheduler;

// ─── Options ────────────────────────────────────────────────────────────────

/// Tunables for a session. The defaults match the platform's expectations;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Capacity of the decoded-event channel between fetch and dispatch.
    pub event_capacity: usize,
    /// Deadline for a single read.
    pub read_timeout: Duration,
    /// Deadline for a single write (heartbeat or ack).
    pub write_timeout: Duration,
    /// Attempts made when the streaming loop (re)starts a connection.
    pub connect_policy: ReconnectPolicy,
    /// Pause before the streaming loop tries again after `connect_policy`
    /// is exhausted.
    pub retry_pause: Duration,
    /// Attempts made when heartbeat, ack or read fails mid-stream.
    pub recover_policy: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(8),
            connect_policy: ReconnectPolicy::fixed(1, Duration::from_secs(5)),
            retry_pause: Duration::from_secs(5),
            recover_policy: ReconnectPolicy::fixed(3, Duration::ZERO),
        }
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Checking,
    Connecting,
    Streaming,
    Disconnected,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Checking => write!(f, "checking"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Default)]
struct Metrics {
    liveness_checks: AtomicU64,
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
    heartbeats_sent: AtomicU64,
    acks_sent: AtomicU64,
}

/// Point-in-time counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub liveness_checks: u64,
    /// Every dial, including those made for recovery.
    pub connect_attempts: u64,
    /// Dials made to recover from a mid-stream failure.
    pub reconnects: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub heartbeats_sent: u64,
    pub acks_sent: u64,
    pub events_dispatched: u64,
    pub handler_failures: u64,
}

// ─── Session ────────────────────────────────────────────────────────────────

/// Handle to one stream's session. Cheap to clone; clones share state.
///
/// # Thread Safety
/// All operations take `&self` and may be called from any task. Do not call
/// [`Session::stop`] or [`Session::set_enable`] from inside an event handler
/// of the same session: both wait for the dispatch activity to finish.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    task_id: TaskId,
    url: String,
    adapter: Arc<dyn Adapter>,
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    schedule: Schedule,
    dispatcher: Dispatcher,
    slot: ConnectionSlot,
    enabled: watch::Sender<bool>,
    live: AtomicBool,
    state: watch::Sender<SessionState>,
    /// Token of the current streaming attempt.
    attempt: Mutex<CancellationToken>,
    /// Held by the streaming loop for its whole run.
    run_lock: Arc<tokio::sync::Mutex<()>>,
    /// Serialises recovery dials between heartbeat and fetch.
    reconnect_lock: tokio::sync::Mutex<()>,
    streaming: Mutex<Option<JoinHandle<()>>>,
    scheduler: tokio::sync::Mutex<Option<Scheduler>>,
    metrics: Metrics,
}

impl Session {
    /// Build a session for `config`. Nothing runs until [`Session::start`].
    pub fn new(
        config: &StreamConfig,
        adapter: Arc<dyn Adapter>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Result<Self, ConfigError> {
        let schedule = config.probe_schedule()?;
        let (enabled, _) = watch::channel(false);
        let (state, _) = watch::channel(SessionState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                task_id: config.id,
                url: config.url.clone(),
                adapter,
                connector,
                options,
                schedule,
                dispatcher: Dispatcher::new(),
                slot: ConnectionSlot::new(),
                enabled,
                live: AtomicBool::new(false),
                state,
                attempt: Mutex::new(CancellationToken::new()),
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
                reconnect_lock: tokio::sync::Mutex::new(()),
                streaming: Mutex::new(None),
                scheduler: tokio::sync::Mutex::new(None),
                metrics: Metrics::default(),
            }),
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Result of the last liveness probe.
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// `true` if both handles refer to the same session.
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Append an event handler.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.inner.dispatcher.subscribe(handler);
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let m = &self.inner.metrics;
        MetricsSnapshot {
            liveness_checks: m.liveness_checks.load(Ordering::Relaxed),
            connect_attempts: m.connect_attempts.load(Ordering::Relaxed),
            reconnects: m.reconnects.load(Ordering::Relaxed),
            frames_received: m.frames_received.load(Ordering::Relaxed),
            decode_errors: m.decode_errors.load(Ordering::Relaxed),
            heartbeats_sent: m.heartbeats_sent.load(Ordering::Relaxed),
            acks_sent: m.acks_sent.load(Ordering::Relaxed),
            events_dispatched: self.inner.dispatcher.events_dispatched(),
            handler_failures: self.inner.dispatcher.handler_failures(),
        }
    }

    /// Enable the session, start the liveness schedule and probe right away.
    pub async fn start(&self) {
        self.inner.enabled.send_replace(true);
        tracing::info!(task_id = self.inner.task_id, url = %self.inner.url, "session started");
        self.inner.ensure_scheduler().await;
        self.inner.probe().await;
    }

    /// Disable the session, stop the schedule, wait for the streaming loop
    /// to wind down and release the connection. Idempotent.
    pub async fn stop(&self) {
        let was_enabled = self.inner.enabled.send_replace(false);
        let scheduler = self.inner.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        self.inner.quiesce().await;
        self.inner.set_state(SessionState::Stopped);
        if was_enabled {
            tracing::info!(task_id = self.inner.task_id, url = %self.inner.url, "session stopped");
        }
    }

    /// Toggle operator intent.
    ///
    /// Disabling behaves like [`Session::stop`] but keeps the liveness
    /// schedule running; ticks take no streaming action while disabled.
    /// Setting the current value is a no-op.
    pub async fn set_enable(&self, enabled: bool) {
        if self.is_enabled() == enabled {
            return;
        }
        if enabled {
            self.start().await;
        } else {
            self.inner.enabled.send_replace(false);
            self.inner.quiesce().await;
            self.inner.set_state(SessionState::Idle);
            tracing::info!(task_id = self.inner.task_id, url = %self.inner.url, "session disabled");
        }
    }

    /// Run a liveness probe now, outside the schedule.
    pub async fn probe(&self) -> bool {
        self.inner.probe().await
    }

    /// Write a binary frame on the current connection.
    pub async fn write(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.inner.write(payload).await
    }

    /// Read one frame from the current connection. While streaming, the
    /// fetch activity competes for the same frames.
    pub async fn read(&self) -> Result<Frame, ConnectionError> {
        let conn = self.inner.slot.get()?;
        let deadline = self.inner.options.read_timeout;
        tokio::time::timeout(deadline, conn.recv())
            .await
            .unwrap_or(Err(ConnectionError::Timeout {
                ms: deadline.as_millis() as u64,
            }))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("task_id", &self.inner.task_id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

// ─── Internals ──────────────────────────────────────────────────────────────

impl Inner {
    fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    fn should_stream(&self) -> bool {
        self.is_enabled() && self.live.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(task_id = self.task_id, from = %prev, to = %next, "session state");
        }
    }

    /// Install a fresh attempt token. If streaming is no longer wanted the
    /// token comes back already cancelled, so a concurrent stop can never
    /// miss it.
    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.attempt.lock() = token.clone();
        if !self.should_stream() {
            token.cancel();
        }
        token
    }

    async fn ensure_scheduler(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock().await;
        if slot.as_ref().is_some_and(Scheduler::is_running) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let name = format!("liveness-{}", self.task_id);
        *slot = Some(Scheduler::spawn(name, self.schedule.clone(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        inner.probe().await;
                        true
                    }
                    None => false,
                }
            }
        }));
    }

    /// Ask the adapter whether the stream is on air and record the answer.
    /// Errors count as "not live".
    async fn refresh_liveness(&self) -> bool {
        self.metrics.liveness_checks.fetch_add(1, Ordering::Relaxed);
        let live = match self.adapter.check_liveness().await {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!(task_id = self.task_id, url = %self.url, error = %e, "liveness check failed");
                false
            }
        };
        let was = self.live.swap(live, Ordering::SeqCst);
        if was != live {
            tracing::info!(task_id = self.task_id, url = %self.url, live, "liveness changed");
        }
        live
    }

    /// Liveness tick: probe, then start streaming or tear down.
    async fn probe(self: &Arc<Self>) -> bool {
        self.state.send_if_modified(|s| {
            if matches!(s, SessionState::Idle | SessionState::Stopped) {
                *s = SessionState::Checking;
                true
            } else {
                false
            }
        });

        let live = self.refresh_liveness().await;
        if live && self.is_enabled() {
            self.spawn_streaming();
        } else {
            if !live {
                self.attempt.lock().cancel();
                self.release_connection().await;
            }
            self.state.send_if_modified(|s| {
                if *s == SessionState::Checking {
                    *s = SessionState::Idle;
                    true
                } else {
                    false
                }
            });
        }
        live
    }

    /// Launch the streaming loop unless one is already running.
    fn spawn_streaming(self: &Arc<Self>) {
        let guard = match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::trace!(task_id = self.task_id, "streaming loop already running");
                return;
            }
        };
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            Arc::clone(&inner).stream_loop().await;
            drop(guard);
            // a probe that raced with our exit could not start a loop itself
            if inner.should_stream() {
                inner.spawn_streaming();
            }
        });
        *self.streaming.lock() = Some(handle);
    }

    /// Cancel the current attempt, wait for the streaming loop to exit and
    /// release the connection.
    async fn quiesce(&self) {
        self.attempt.lock().cancel();
        let handle = self.streaming.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(task_id = self.task_id, "streaming loop panicked");
                }
            }
        }
        // a loop spawned after the handle was taken still holds the lock
        let _running = self.run_lock.lock().await;
        self.release_connection().await;
    }

    async fn release_connection(&self) {
        if let Some(old) = self.slot.release() {
            old.close().await;
            tracing::debug!(task_id = self.task_id, "connection released");
        }
    }

    async fn write(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        let conn = self.slot.get()?;
        let deadline = self.options.write_timeout;
        tokio::time::timeout(deadline, conn.send_binary(payload))
            .await
            .unwrap_or(Err(ConnectionError::Timeout {
                ms: deadline.as_millis() as u64,
            }))
    }

    // ─── Streaming loop ─────────────────────────────────────────────────────

    async fn stream_loop(self: Arc<Self>) {
        tracing::info!(task_id = self.task_id, url = %self.url, "streaming loop started");

        while self.should_stream() {
            let token = self.fresh_token();
            self.set_state(SessionState::Connecting);

            if !self.connect(&self.options.connect_policy, &token, false).await {
                self.set_state(SessionState::Disconnected);
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.options.retry_pause) => {}
                }
                continue;
            }

            self.set_state(SessionState::Streaming);
            let (tx, rx) = mpsc::channel(self.options.event_capacity.max(1));
            tokio::join!(
                async {
                    self.heartbeat(&token).await;
                    token.cancel();
                },
                async {
                    self.fetch(&token, tx).await;
                    token.cancel();
                },
                async {
                    self.dispatcher.pump(rx, &token).await;
                    token.cancel();
                },
            );
            self.set_state(SessionState::Disconnected);

            if self.should_stream() {
                self.refresh_liveness().await;
            }
        }

        self.release_connection().await;
        self.set_state(SessionState::Idle);
        tracing::info!(task_id = self.task_id, url = %self.url, "streaming loop stopped");
    }

    /// Dial up to `policy` attempts. Returns `true` once a connection is
    /// installed.
    async fn connect(&self, policy: &ReconnectPolicy, token: &CancellationToken, recovering: bool) -> bool {
        for attempt in 1..=policy.attempts() {
            if token.is_cancelled() || !self.should_stream() {
                return false;
            }
            self.metrics.connect_attempts.fetch_add(1, Ordering::Relaxed);
            if recovering {
                self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            }

            match self.dial(token).await {
                Ok(conn) => {
                    if let Some(old) = self.slot.install(conn) {
                        old.close().await;
                    }
                    tracing::info!(task_id = self.task_id, url = %self.url, attempt, recovering, "connected");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(task_id = self.task_id, url = %self.url, attempt, error = %e, "connect attempt failed");
                }
            }

            if let Some(delay) = policy.delay_after(attempt) {
                tokio::select! {
                    _ = token.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        false
    }

    async fn dial(&self, token: &CancellationToken) -> Result<Arc<dyn Connection>, ConnectionError> {
        let info = self
            .adapter
            .connection_info()
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        tokio::select! {
            _ = token.cancelled() => Err(ConnectionError::Closed("attempt cancelled".into())),
            res = self.connector.connect(&info) => res,
        }
    }

    /// Replace a failed connection. `observed` is the generation the caller
    /// saw fail; if another activity already replaced it, nothing is dialled.
    async fn recover(&self, observed: u64, token: &CancellationToken) -> bool {
        let _serial = tokio::select! {
            _ = token.cancelled() => return false,
            guard = self.reconnect_lock.lock() => guard,
        };
        if self.slot.generation() != observed && self.slot.is_connected() {
            return true;
        }
        let recovered = self.connect(&self.options.recover_policy, token, true).await;
        if !recovered && !token.is_cancelled() {
            tracing::warn!(task_id = self.task_id, url = %self.url, "reconnect attempts exhausted");
        }
        recovered
    }

    async fn heartbeat(&self, token: &CancellationToken) {
        let spec = self.adapter.heartbeat_spec();
        let period = spec.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let generation = self.slot.generation();
            match self.write(spec.payload.clone()).await {
                Ok(()) => {
                    self.metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(task_id = self.task_id, "heartbeat sent");
                }
                Err(e) => {
                    tracing::warn!(task_id = self.task_id, url = %self.url, error = %e, "heartbeat failed");
                    if !self.recover(generation, token).await {
                        return;
                    }
                }
            }
        }
    }

    async fn fetch(&self, token: &CancellationToken, sink: EventSink) {
        loop {
            let Some((conn, generation)) = self.slot.current() else {
                return;
            };
            let deadline = self.options.read_timeout;
            let read = tokio::select! {
                _ = token.cancelled() => return,
                r = tokio::time::timeout(deadline, conn.recv()) => r,
            };
            let frame = read.unwrap_or(Err(ConnectionError::Timeout {
                ms: deadline.as_millis() as u64,
            }));

            match frame {
                Ok(Frame::Binary(data)) if !data.is_empty() => {
                    self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                    if !self.handle_frame(&data, &sink, token).await {
                        return;
                    }
                }
                Ok(Frame::Close) => {
                    tracing::info!(task_id = self.task_id, url = %self.url, "remote closed the connection");
                    return;
                }
                Ok(_) => continue,
                Err(e) => {
                    if self.slot.generation() != generation {
                        // swapped out by a concurrent reconnect; read the new one
                        continue;
                    }
                    tracing::warn!(task_id = self.task_id, url = %self.url, error = %e, "read failed");
                    if !self.recover(generation, token).await {
                        return;
                    }
                }
            }
        }
    }

    /// Decode one frame and write its ack. Returns `false` when the fetch
    /// activity should end.
    async fn handle_frame(&self, data: &[u8], sink: &EventSink, token: &CancellationToken) -> bool {
        let decoded = tokio::select! {
            _ = token.cancelled() => return false,
            r = self.adapter.decode_frame(data, sink) => r,
        };

        let ack = match decoded {
            Ok(ack) => ack,
            Err(DecodeError::SinkClosed) => return false,
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(task_id = self.task_id, error = %e, "frame skipped");
                return true;
            }
        };

        let Some(ack) = ack else {
            return true;
        };
        let generation = self.slot.generation();
        match self.write(ack).await {
            Ok(()) => {
                self.metrics.acks_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                tracing::warn!(task_id = self.task_id, url = %self.url, error = %e, "ack write failed");
                self.recover(generation, token).await
            }
        }
    }
}

/// Convenience for tests and embedding: collect events into a channel.
pub fn channel_handler(capacity: usize) -> (Arc<dyn EventHandler>, mpsc::Receiver<LiveEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Arc::new(ForwardHandler(tx)), rx)
}

struct ForwardHandler(mpsc::Sender<LiveEvent>);

#[async_trait::async_trait]
impl EventHandler for ForwardHandler {
    fn name(&self) -> &str {
        "forward"
    }

    async fn handle(&self, event: &LiveEvent) -> Result<(), danmu_core::error::HandlerError> {
        self.0
            .send(event.clone())
            .await
            .map_err(|_| danmu_core::error::HandlerError::failed("forward", "receiver dropped"))
    }
}
