// src/exec/executor_loop.rs

//! Main executor loop that manages running jobs.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::dispatch::DispatchedJob;
use crate::engine::RuntimeEvent;
use crate::exec::job_runner::run_job;
use crate::types::JobId;

/// Requests the backend forwards to the executor loop.
#[derive(Debug)]
pub enum ExecutorRequest {
    Run(DispatchedJob),
    Cancel(JobId),
}

/// Internal handle for a running job.
///
/// - `cancel` asks the runner to kill the process and report the job
///   canceled.
/// - `handle` is the Tokio task that is actually running the job.
struct ActiveJob {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`super::RealExecutorBackend`] forwards
/// requests to. Each job runs in its own Tokio task; per job id there is
/// never more than one runner at a time.
pub fn spawn_executor(runtime_tx: mpsc::Sender<RuntimeEvent>) -> mpsc::Sender<ExecutorRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecutorRequest>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<JobId, ActiveJob> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());
            match request {
                ExecutorRequest::Run(job) => start_job(job, &mut active, &runtime_tx),
                ExecutorRequest::Cancel(id) => cancel_job(id, &mut active),
            }
        }

        // Dropping the cancel senders makes every runner kill its process.
        info!(running = active.len(), "executor loop finished (channel closed)");
    });

    tx
}

fn start_job(
    job: DispatchedJob,
    active: &mut HashMap<JobId, ActiveJob>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let id = job.id;
    if active.contains_key(&id) {
        warn!(job = %id, "job already running; ignoring duplicate dispatch");
        return;
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_job(job, rt_tx, cancel_rx).await;
        debug!(job = %id, "job runner future finished");
    });

    active.insert(
        id,
        ActiveJob {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn cancel_job(id: JobId, active: &mut HashMap<JobId, ActiveJob>) {
    let Some(existing) = active.get_mut(&id) else {
        debug!(job = %id, "cancel for job that is not running; ignoring");
        return;
    };

    info!(job = %id, "cancelling running job");
    match existing.cancel.take() {
        Some(cancel) => {
            if cancel.send(()).is_err() {
                debug!(job = %id, "job already finished while cancelling");
            }
        }
        None => debug!(job = %id, "job was already cancelled"),
    }
}
