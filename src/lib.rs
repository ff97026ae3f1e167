//! Reconciles polled snapshots of segmented transfers with user commands into
//! one consistent view of status, progress and throughput.
//!
//! - [`aggregate`] and [`throughput`] are pure calculations over snapshots.
//! - [`reconcile`] holds optimistic pause/resume commands until a snapshot
//!   confirms, overrides or outlives them.
//! - [`store`] is the single table of derived state, merged once per cycle.
//! - [`engine`] drives the poll loop and publishes complete views.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod source;
pub mod state;
pub mod store;
pub mod throughput;
pub mod utils;

pub use aggregate::{aggregate, Aggregate, Segment};
pub use cli::ViewFilter;
pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle, PollOutcome};
pub use error::{CommandError, ConfigError, ControlError, SnapshotError, SourceError};
pub use reconcile::{CommandReconciler, ControlAction, PendingCommand};
pub use source::{HttpSnapshotSource, SnapshotSource, StartRequest};
pub use state::{PartSnapshot, TransferSnapshot, TransferStatus, WireStatus};
pub use store::{CycleReport, StoreView, TransferStore, TransferSummary, TransferView};
pub use throughput::{ScaledRate, ThroughputEstimator};
