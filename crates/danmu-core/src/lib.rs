//! danmu-core — shared building blocks for live-stream event ingestion.
//!
//! # Contents
//! - [`event`]: the decoded event model (`LiveEvent`, `EventBody`, `EventKind`)
//! - [`adapter`]: the per-platform strategy trait a session drives
//! - [`handler`]: event handlers and the order-preserving `Dispatcher`
//! - [`dedup`]: bounded recency cache for at-most-once side effects
//! - [`config`]: stream configuration snapshots and liveness schedules
//! - [`store`]: where stream configurations come from
//! - [`signer`]: opaque signature capability consumed by adapters
//! - [`policy`]: reconnect attempt/backoff policy

pub mod adapter;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod handler;
pub mod policy;
pub mod signer;
pub mod store;

pub use adapter::{
    Adapter, AdapterFactory, AdapterRouter, ConnectionInfo, EventSink, HeartbeatSpec,
};
pub use config::{Schedule, StreamConfig, TaskId};
pub use dedup::{DedupCache, Deduplicated, DEFAULT_DEDUP_CAPACITY};
pub use error::{
    AdapterError, ConfigError, ConnectionError, DecodeError, HandlerError, SignError, StoreError,
};
pub use event::{EventBody, EventKind, LiveEvent, User};
pub use handler::{DispatchReport, Dispatcher, EventHandler, HandlerFactory};
pub use policy::ReconnectPolicy;
pub use signer::{Signer, StaticSigner};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore};
