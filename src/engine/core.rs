// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending dispatched jobs and cancellations to the executor
//! - writing records to the job store
//! - publishing snapshots and answering callers
//!
//! The core is tested without any Tokio runtime, processes or stores.

use tracing::debug;

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    commands_for, handle_dequeue, handle_enqueue, handle_enqueue_all, handle_job_completion, handle_requeue,
    handle_shutdown, handle_stop_request, maybe_exit_when_settled, CoreStep,
};
use crate::engine::{RunSnapshot, RuntimeEvent, RuntimeOptions};

/// Pure core runtime state.
///
/// This owns:
/// - the job scheduler
/// - runtime options (e.g. `exit_when_settled`)
/// - whether a shutdown is in progress
///
/// It has **no** channels and performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    options: RuntimeOptions,
    shutting_down: bool,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        Self {
            scheduler,
            options,
            shutting_down: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.scheduler.snapshot()
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let mut step = self.dispatch_event(event);
        maybe_exit_when_settled(&self.scheduler, &self.options, &mut step);
        step
    }

    fn dispatch_event(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Enqueue {
                graph,
                root,
                force,
                reply,
            } => handle_enqueue(&mut self.scheduler, graph, root, force, reply),
            RuntimeEvent::EnqueueAll {
                trees,
                force,
                reply,
            } => handle_enqueue_all(&mut self.scheduler, trees, force, reply),
            RuntimeEvent::Requeue { root, force, reply } => {
                handle_requeue(&mut self.scheduler, root, force, reply)
            }
            RuntimeEvent::Dequeue { root, reply } => {
                handle_dequeue(&mut self.scheduler, root, reply)
            }
            RuntimeEvent::SetPaused(paused) => {
                if self.shutting_down && !paused {
                    debug!("ignoring resume while shutting down");
                    return CoreStep::continue_with(Vec::new());
                }
                let step = self.scheduler.set_paused(paused);
                CoreStep::continue_with(commands_for(&self.scheduler, step))
            }
            RuntimeEvent::RequestStop(id) => handle_stop_request(&mut self.scheduler, id),
            RuntimeEvent::JobStarted { job } => {
                let step = self.scheduler.handle_started(job);
                CoreStep::continue_with(commands_for(&self.scheduler, step))
            }
            RuntimeEvent::JobCompleted { job, outcome } => {
                handle_job_completion(&mut self.scheduler, self.shutting_down, job, outcome)
            }
            RuntimeEvent::ShutdownRequested => {
                self.shutting_down = true;
                handle_shutdown(&mut self.scheduler)
            }
        }
    }
}
