//! danmu-douyin — Douyin live-room adapter.
//!
//! Decodes the webcast push protocol (protobuf frames, gzip batches) into
//! [`danmu_core::LiveEvent`]s, probes liveness through the room-enter API
//! and builds signed push socket URLs.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use danmu_core::{AdapterFactory, StaticSigner};
//! use danmu_douyin::{DouyinAdapterFactory, DouyinConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = DouyinAdapterFactory::new(
//!     Arc::new(StaticSigner("signature".into())),
//!     DouyinConfig::default(),
//! )?;
//! let adapter = factory.create("https://live.douyin.com/123456").await?;
//! let live = adapter.check_liveness().await?;
//! # let _ = live;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod decode;
pub mod gift;
pub mod identity;
pub mod params;
pub mod proto;
pub mod room;
pub mod signer;

pub use adapter::{DouyinAdapter, DouyinAdapterFactory, DouyinConfig, PLATFORM};
pub use room::RoomInfo;
pub use signer::CommandSigner;
