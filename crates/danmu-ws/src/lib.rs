//! danmu-ws — per-stream WebSocket session engine.
//!
//! # Features
//! - Liveness-driven connect: streams are only dialled while on air
//! - Heartbeat, fetch/decode and dispatch run as three cooperating activities
//! - Bounded reconnects on heartbeat, ack or read failure
//! - Order-preserving, fault-isolated dispatch to subscribed handlers
//! - Cooperative cancellation on disable/stop, with buffered events drained

pub mod connection;
pub mod scheduler;
pub mod session;
pub mod ws;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use connection::{Connection, ConnectionSlot, Connector, Frame};
pub use scheduler::Scheduler;
pub use session::{MetricsSnapshot, Session, SessionOptions, SessionState};
pub use ws::{WsConnection, WsConnector};
