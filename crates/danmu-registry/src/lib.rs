//! danmu-registry — supervises many stream sessions keyed by task id.
//!
//! The [`TaskRegistry`] owns one [`danmu_ws::Session`] per task and applies
//! add / update / delete / stop requests concurrently: a short structural
//! lock guards the maps, and a per-task lock serialises slow lifecycle work
//! on the same id without blocking other ids.

pub mod control;
pub mod error;
pub mod factory;
pub mod registry;

pub use control::{ControlResponse, ControlService};
pub use error::{BuildError, RegistryError};
pub use factory::{DefaultSessionFactory, SessionFactory};
pub use registry::{Task, TaskOutcome, TaskRegistry};
