// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::dispatch::DispatchedJob;
use crate::types::JobId;

/// Structured result of a single scheduler "step".
///
/// Tests that drive the scheduler by hand assert on these; the core runtime
/// turns them into executor and store commands.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs handed to the executor in this step.
    pub dispatched: Vec<DispatchedJob>,
    /// Jobs whose persisted state or run state changed in this step.
    pub changed: Vec<JobId>,
    /// Jobs newly marked as failed (including dependents failed because of
    /// an upstream failure).
    pub newly_failed: Vec<JobId>,
    /// Trees that became settled (every job terminal) in this step.
    pub settled_trees: Vec<JobId>,
}

impl SchedulerStep {
    pub fn merge(&mut self, other: SchedulerStep) {
        self.dispatched.extend(other.dispatched);
        for id in other.changed {
            if !self.changed.contains(&id) {
                self.changed.push(id);
            }
        }
        self.newly_failed.extend(other.newly_failed);
        self.settled_trees.extend(other.settled_trees);
    }

    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.changed.is_empty()
    }
}

/// What `request_stop` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// The job is dispatched or running; the executor must kill it and will
    /// report it canceled.
    KillInFlight,
    /// The job was still waiting and is now canceled.
    CanceledWaiting,
    /// The job already reached a terminal state.
    AlreadyTerminal,
    /// The job is known but not enqueued.
    NotEnqueued,
}
