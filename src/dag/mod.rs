// src/dag/mod.rs

//! Job graph representation and scheduling.
//!
//! - [`graph`] holds the arena of jobs and their child / finished edges.
//! - [`outdated`] decides whether a job's recorded run is still valid.
//! - [`scheduler`] contains the state machine that decides which jobs are
//!   ready, which are skipped and which fail because of upstream failures.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-job state transitions.
//! - [`dispatch`] describes the work handed to the executor.

pub mod dispatch;
pub mod graph;
pub mod outdated;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use dispatch::{CleanupPolicy, DispatchedJob, Launch, PrepareStep, ProcessSpec, SplitSpec};
pub use graph::JobGraph;
pub use outdated::OutOfDateReason;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::{SchedulerStep, StopAction};
