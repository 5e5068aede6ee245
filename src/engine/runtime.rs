// src/engine/runtime.rs

use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::dag::DispatchedJob;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::store::JobStore;

use super::core::CoreRuntime;
use super::event_handlers::Reply;
use super::{CoreCommand, RunSnapshot, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates job
/// execution to an `ExecutorBackend` and persistence to a `JobStore`.
///
/// All run manager semantics live in `CoreRuntime`; this type only performs
/// the commands it returns. After every step it publishes a [`RunSnapshot`] and
/// only then answers the callers waiting on that step, so a caller that
/// got its reply always sees the state it caused.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    store: Box<dyn JobStore>,
    snapshot_tx: watch::Sender<RunSnapshot>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        store: Box<dyn JobStore>,
        snapshot_tx: watch::Sender<RunSnapshot>,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            store,
            snapshot_tx,
        }
    }

    /// Serve events until the channel closes or the core asks to exit.
    ///
    /// Observers always see a final snapshot marked `stopped`, also when
    /// the loop ends with an error.
    pub async fn run(mut self) -> Result<()> {
        info!("runmanager runtime started");
        let result = self.event_loop().await;

        let mut last = self.core.snapshot();
        last.stopped = true;
        self.snapshot_tx.send_replace(last);

        if let Err(err) = &result {
            error!(error = %err, "runtime stopped with error");
        }
        info!("runtime exiting");
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("all run manager handles dropped; runtime exiting");
                    return Ok(());
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            let mut replies = Vec::new();
            for command in step.commands {
                match command {
                    CoreCommand::Reply(reply) => replies.push(reply),
                    other => self.execute_command(other).await?,
                }
            }

            self.snapshot_tx.send_replace(self.core.snapshot());
            replies.into_iter().for_each(Reply::deliver);

            if !step.keep_running {
                info!("run manager shut down");
                return Ok(());
            }
        }
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchJobs(jobs) => {
                self.spawn_ready(jobs).await?;
            }
            CoreCommand::CancelJob(id) => {
                debug!(job = %id, "asking executor to cancel job");
                self.executor.cancel_job(id).await?;
            }
            CoreCommand::Persist(records) => {
                // A failed write loses the batch, not the run.
                if let Err(err) = self.store.save_jobs(&records) {
                    error!(jobs = records.len(), error = %err, "failed to persist job state");
                }
            }
            CoreCommand::Forget(ids) => {
                for id in ids {
                    if let Err(err) = self.store.remove_job(id) {
                        error!(job = %id, error = %err, "failed to remove job from store");
                    }
                }
            }
            CoreCommand::Reply(reply) => reply.deliver(),
            CoreCommand::RequestExit => {
                debug!("core asked the runtime to exit");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, jobs: Vec<DispatchedJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = jobs.iter().map(|j| j.id.to_string()).collect();
        debug!(?ids, "spawning dispatched jobs");

        self.executor.spawn_ready_jobs(jobs).await
    }
}
