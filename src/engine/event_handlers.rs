// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dag::{DispatchedJob, JobGraph, Scheduler, SchedulerStep, StopAction};
use crate::engine::{JobOutcome, RuntimeOptions};
use crate::errors::Result;
use crate::store::JobRecord;
use crate::types::JobId;

/// Answer to a caller waiting on a request.
#[derive(Debug)]
pub enum Reply {
    Done(oneshot::Sender<Result<()>>, Result<()>),
    Graph(oneshot::Sender<Result<JobGraph>>, Result<JobGraph>),
}

impl Reply {
    /// Hand the result to the caller; a caller that stopped waiting is
    /// ignored.
    pub fn deliver(self) {
        let delivered = match self {
            Reply::Done(tx, res) => tx.send(res).is_ok(),
            Reply::Graph(tx, res) => tx.send(res).is_ok(),
        };
        if !delivered {
            debug!("caller dropped before reply was delivered");
        }
    }
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<DispatchedJob>),
    /// Kill a running job; the executor reports it canceled.
    CancelJob(JobId),
    /// Write these records to the job store.
    Persist(Vec<JobRecord>),
    /// Remove these jobs from the job store.
    Forget(Vec<JobId>),
    /// Answer a caller, after the new snapshot is published.
    Reply(Reply),
    /// Request that the runtime loop exits.
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn continue_with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Turn a scheduler step into executor and store commands.
pub fn commands_for(scheduler: &Scheduler, step: SchedulerStep) -> Vec<CoreCommand> {
    let mut commands = Vec::new();

    if !step.dispatched.is_empty() {
        commands.push(CoreCommand::DispatchJobs(step.dispatched));
    }

    let records: Vec<JobRecord> = step
        .changed
        .iter()
        .filter_map(|id| scheduler.record(*id))
        .collect();
    if !records.is_empty() {
        commands.push(CoreCommand::Persist(records));
    }

    commands
}

pub fn handle_enqueue(
    scheduler: &mut Scheduler,
    graph: JobGraph,
    root: JobId,
    force: bool,
    reply: oneshot::Sender<Result<()>>,
) -> CoreStep {
    let mut commands = Vec::new();
    match scheduler.enqueue(graph, root, force) {
        Ok(step) => {
            commands.extend(commands_for(scheduler, step));
            commands.push(CoreCommand::Reply(Reply::Done(reply, Ok(()))));
        }
        Err(err) => {
            warn!(tree = %root, error = %err, "enqueue rejected");
            commands.push(CoreCommand::Reply(Reply::Done(reply, Err(err))));
        }
    }
    CoreStep::continue_with(commands)
}

/// Enqueue every tree in order, stopping at the first rejected one. Trees
/// enqueued before it stay scheduled.
pub fn handle_enqueue_all(
    scheduler: &mut Scheduler,
    trees: Vec<(JobGraph, JobId)>,
    force: bool,
    reply: oneshot::Sender<Result<()>>,
) -> CoreStep {
    let mut commands = Vec::new();
    let count = trees.len();
    for (graph, root) in trees {
        match scheduler.enqueue(graph, root, force) {
            Ok(step) => commands.extend(commands_for(scheduler, step)),
            Err(err) => {
                warn!(tree = %root, error = %err, "enqueue rejected");
                commands.push(CoreCommand::Reply(Reply::Done(reply, Err(err))));
                return CoreStep::continue_with(commands);
            }
        }
    }
    debug!(trees = count, "enqueued batch of job trees");
    commands.push(CoreCommand::Reply(Reply::Done(reply, Ok(()))));
    CoreStep::continue_with(commands)
}

pub fn handle_requeue(
    scheduler: &mut Scheduler,
    root: JobId,
    force: bool,
    reply: oneshot::Sender<Result<()>>,
) -> CoreStep {
    let mut commands = Vec::new();
    match scheduler.requeue(root, force) {
        Ok(step) => {
            commands.extend(commands_for(scheduler, step));
            commands.push(CoreCommand::Reply(Reply::Done(reply, Ok(()))));
        }
        Err(err) => {
            warn!(tree = %root, error = %err, "requeue rejected");
            commands.push(CoreCommand::Reply(Reply::Done(reply, Err(err))));
        }
    }
    CoreStep::continue_with(commands)
}

pub fn handle_dequeue(
    scheduler: &mut Scheduler,
    root: JobId,
    reply: oneshot::Sender<Result<JobGraph>>,
) -> CoreStep {
    let mut commands = Vec::new();
    match scheduler.dequeue(root) {
        Ok(graph) => {
            commands.push(CoreCommand::Forget(graph.ids().to_vec()));
            commands.push(CoreCommand::Reply(Reply::Graph(reply, Ok(graph))));
        }
        Err(err) => {
            warn!(tree = %root, error = %err, "dequeue rejected");
            commands.push(CoreCommand::Reply(Reply::Graph(reply, Err(err))));
        }
    }
    CoreStep::continue_with(commands)
}

pub fn handle_stop_request(scheduler: &mut Scheduler, id: JobId) -> CoreStep {
    let mut commands = Vec::new();
    match scheduler.request_stop(id) {
        Ok((StopAction::KillInFlight, _)) => commands.push(CoreCommand::CancelJob(id)),
        Ok((_, step)) => commands.extend(commands_for(scheduler, step)),
        Err(err) => warn!(job = %id, error = %err, "stop request for unknown job"),
    }
    CoreStep::continue_with(commands)
}

/// Handle a job completion event.
///
/// While shutting down, the runtime exits as soon as nothing is in flight.
pub fn handle_job_completion(
    scheduler: &mut Scheduler,
    shutting_down: bool,
    id: JobId,
    outcome: JobOutcome,
) -> CoreStep {
    let step = scheduler.handle_completion(id, outcome);
    let mut commands = commands_for(scheduler, step);

    let mut keep_running = true;
    if shutting_down && scheduler.in_flight() == 0 {
        info!("all running jobs stopped; exiting");
        keep_running = false;
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// In `exit_when_settled` mode, stop once every enqueued tree settled.
pub fn maybe_exit_when_settled(scheduler: &Scheduler, options: &RuntimeOptions, step: &mut CoreStep) {
    if !step.keep_running || !options.exit_when_settled {
        return;
    }
    if !scheduler.trees().is_empty() && scheduler.all_settled() && scheduler.in_flight() == 0 {
        info!("all job trees settled; exiting");
        step.keep_running = false;
        step.commands.push(CoreCommand::RequestExit);
    }
}

/// Handle a shutdown request: pause the queue and stop every job in
/// flight. The runtime keeps going until their cancellations come back.
pub fn handle_shutdown(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.set_paused(true);
    let mut commands = commands_for(scheduler, step);

    let running = scheduler.in_flight_jobs();
    if running.is_empty() {
        commands.push(CoreCommand::RequestExit);
        return CoreStep {
            commands,
            keep_running: false,
        };
    }

    info!(running = running.len(), "shutdown requested; stopping running jobs");
    commands.extend(running.into_iter().map(CoreCommand::CancelJob));
    CoreStep::continue_with(commands)
}
