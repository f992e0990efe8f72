//! # temandifa-core
//!
//! Building blocks shared by every Temandifa gateway crate.
//!
//! - [`operation`] - downstream inference operation kinds
//! - [`tasks`] - tracked background work with bounded shutdown drain
//! - [`metrics`] - Prometheus metric names and recording helpers
//! - [`time`] - wall-clock helpers

pub mod metrics;
pub mod operation;
pub mod tasks;
pub mod time;

pub use operation::OperationKind;
pub use tasks::{BackgroundTasks, DrainOutcome};
pub use time::{now_utc, saturating_add, saturating_sub, unix_nanos};
