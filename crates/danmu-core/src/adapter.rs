//! The `Adapter` trait: the per-platform strategy a session drives.
//!
//! An adapter knows how to reach one stream on one platform: where to
//! connect, what to send as a keep-alive, how to turn binary frames into
//! [`LiveEvent`]s and how to ask whether the stream is on air. It has no
//! lifecycle of its own; the session owns it and decides when to call it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{AdapterError, DecodeError};
use crate::event::LiveEvent;

/// Bounded channel into which decoded events are pushed.
///
/// Sends await when the channel is full, which is how a slow dispatcher
/// applies backpressure to frame decoding.
pub type EventSink = mpsc::Sender<LiveEvent>;

/// Everything needed to open the WebSocket for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub url: String,
    /// Request headers (name, value) sent with the upgrade request.
    pub headers: Vec<(String, String)>,
}

impl ConnectionInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Keep-alive frame and cadence. Fixed per adapter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSpec {
    pub interval: Duration,
    pub payload: Vec<u8>,
}

/// A platform strategy bound to a single stream.
///
/// # Thread Safety
/// `check_liveness` may run concurrently with an active streaming loop, so
/// any state it shares with `connection_info` (e.g. a resolved room id) must
/// be synchronised by the implementation. `decode_frame` is only ever called
/// from one task at a time.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Platform name, used in logs.
    fn platform(&self) -> &str;

    /// Resolve the WebSocket endpoint and auth headers for a new attempt.
    ///
    /// Fails with [`AdapterError::Identity`] until a liveness probe has
    /// resolved the stream's identity.
    async fn connection_info(&self) -> Result<ConnectionInfo, AdapterError>;

    fn heartbeat_spec(&self) -> HeartbeatSpec;

    /// Decode one binary frame, pushing zero or more events into `sink`.
    ///
    /// Returns the ack frame to write back when the frame asks for one.
    async fn decode_frame(
        &self,
        raw: &[u8],
        sink: &EventSink,
    ) -> Result<Option<Vec<u8>>, DecodeError>;

    /// Ask the platform whether the stream is currently on air.
    async fn check_liveness(&self) -> Result<bool, AdapterError>;
}

/// Resolves a platform strategy from a stream URL.
#[async_trait]
pub trait AdapterFactory: Send + Sync + 'static {
    /// Build an adapter for `url`, or fail with a config error if the URL
    /// does not belong to a supported platform.
    async fn create(&self, url: &str) -> Result<Arc<dyn Adapter>, AdapterError>;
}

/// Tries each factory in order and returns the first adapter that accepts
/// the URL.
pub struct AdapterRouter {
    factories: Vec<Arc<dyn AdapterFactory>>,
}

impl AdapterRouter {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    pub fn with(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factories.push(factory);
        self
    }
}

impl Default for AdapterRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdapterFactory for AdapterRouter {
    async fn create(&self, url: &str) -> Result<Arc<dyn Adapter>, AdapterError> {
        for factory in &self.factories {
            match factory.create(url).await {
                Err(AdapterError::Config(crate::error::ConfigError::UnsupportedUrl { .. })) => {
                    continue
                }
                other => return other,
            }
        }
        Err(crate::error::ConfigError::UnsupportedUrl { url: url.into() }.into())
    }
}
