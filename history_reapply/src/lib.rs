#![forbid(unsafe_code)]

//! Signal reapplication for replicated, event-sourced workflow executions.
//!
//! When two clusters append to the same execution and one branch wins,
//! the signals only the losing branch saw are reapplied to the winner
//! exactly once. The kernel holds no I/O: the execution record is reached
//! through [`state::MutableState`], and [`execution::ExecutionState`] is
//! the in-memory implementation used by the runtime and tests.

/// Kernel format version. Bound into canonical hashes and snapshots.
pub const KERNEL_VERSION: u32 = 1;

pub mod context;
pub mod dedup;
pub mod error;
pub mod events;
pub mod execution;
pub mod hashing;
pub mod invariants;
pub mod metrics;
pub mod reapplier;
pub mod state;
pub mod transitions;

pub use context::{CancellationFlag, ReapplyContext};
pub use dedup::DedupKey;
pub use error::{InvariantViolation, ReapplyError, StateError, TransitionError};
pub use events::{EventAttributes, EventType, Header, HistoryEvent, SignalAttributes};
pub use execution::{ExecutionState, ExecutionStatus};
pub use reapplier::{EventsReapplier, Reapplier};
pub use state::MutableState;
