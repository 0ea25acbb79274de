//! Periodic and on-demand pool maintenance.
//!
//! This module provides:
//! - [`RunCoordinator`]: Single-flight queue and timers for pool-mutating tasks
//! - [`CycleRunner`]: Executes one health, media, purge or ingest task
//! - [`Clock`]: Wall-clock source for stored timestamps

pub mod clock;
pub mod coordinator;
pub mod cycle;

pub use clock::{Clock, SystemClock};
pub use coordinator::{CoordinatorConfig, CycleOutcome, RunCoordinator};
pub use cycle::{CycleReport, CycleRunner, CycleTask};
