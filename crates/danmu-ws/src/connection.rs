//! Connection abstraction and the session's connection slot.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use danmu_core::adapter::ConnectionInfo;
use danmu_core::error::ConnectionError;

/// One inbound WebSocket message, reduced to what a session cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
    /// Ping, pong or raw control frame.
    Control,
    /// The peer closed cleanly (normal closure or going away).
    Close,
}

/// An open, full-duplex connection.
///
/// # Thread Safety
/// Reads and writes may be issued concurrently from different tasks; the
/// implementation serialises each direction independently. `close` must
/// wake any pending `recv` with an error.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Wait for the next frame. An abnormal close is an error.
    async fn recv(&self) -> Result<Frame, ConnectionError>;

    async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ConnectionError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// Opens connections from adapter-supplied connection info.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Arc<dyn Connection>, ConnectionError>;
}

struct SlotInner {
    conn: Option<Arc<dyn Connection>>,
    generation: u64,
}

/// Holder of a session's single live connection.
///
/// The lock is only held to clone or swap the handle, never across I/O.
/// Every install or release bumps the generation, which lets a reader whose
/// connection was swapped out underneath it tell a superseded connection
/// apart from a genuine failure.
pub struct ConnectionSlot {
    inner: RwLock<SlotInner>,
}

impl ConnectionSlot {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SlotInner {
                conn: None,
                generation: 0,
            }),
        }
    }

    /// Current connection and its generation.
    pub fn current(&self) -> Option<(Arc<dyn Connection>, u64)> {
        let inner = self.inner.read();
        inner.conn.clone().map(|c| (c, inner.generation))
    }

    pub fn get(&self) -> Result<Arc<dyn Connection>, ConnectionError> {
        self.inner
            .read()
            .conn
            .clone()
            .ok_or(ConnectionError::NotAvailable)
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().conn.is_some()
    }

    /// Install a new connection, returning the one it replaces.
    /// The caller closes the returned connection.
    #[must_use = "the replaced connection must be closed"]
    pub fn install(&self, conn: Arc<dyn Connection>) -> Option<Arc<dyn Connection>> {
        let mut inner = self.inner.write();
        inner.generation += 1;
        inner.conn.replace(conn)
    }

    /// Drop the handle, returning it for the caller to close.
    #[must_use = "the released connection must be closed"]
    pub fn release(&self) -> Option<Arc<dyn Connection>> {
        let mut inner = self.inner.write();
        let old = inner.conn.take();
        if old.is_some() {
            inner.generation += 1;
        }
        old
    }
}

impl Default for ConnectionSlot {
    fn default() -> Self {
        Self::new()
    }
}
