#![forbid(unsafe_code)]

//! Runtime for the history reapplication kernel.
//!
//! Adds a protobuf history log, snapshots, replay and per-run sessions
//! around the kernel. No reapplication logic lives here: all state changes
//! go through `history_reapply`.

pub mod config;
pub mod error;
pub mod event_store;
pub mod fixture;
pub mod logging;
pub mod proto_bridge;
pub mod proto_types;
pub mod replay;
pub mod session;
pub mod snapshot;

pub use config::{ConfigError, RuntimeConfig};
pub use error::RuntimeError;
pub use session::{ExecutionSession, SharedSession};
