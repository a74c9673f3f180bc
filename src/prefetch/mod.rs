//! Neighbor-window prefetching.
//!
//! - [`planner`]: ReferenceList, PrefetchTask, candidate ordering
//! - [`scheduler`]: Per-session state machine, stagger timers, dispatch

pub mod planner;
pub mod scheduler;

pub use planner::{plan, PrefetchTask, ReferenceList};
pub use scheduler::{PrefetchScheduler, PrefetchStatsSnapshot, SchedulerError};
