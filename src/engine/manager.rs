// src/engine/manager.rs

//! Caller-facing handle to a running manager.
//!
//! Every request is a message to the runtime task; queries read the latest
//! published [`RunSnapshot`] and never block the runtime.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dag::{JobGraph, Scheduler};
use crate::errors::{Result, RunManagerError};
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::store::JobStore;
use crate::types::{JobId, TreeStatus};

use super::core::CoreRuntime;
use super::runtime::Runtime;
use super::{JobView, RunSnapshot, RuntimeEvent, RuntimeOptions};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to a manager running on the current Tokio runtime.
#[derive(Debug)]
pub struct RunManager {
    tx: mpsc::Sender<RuntimeEvent>,
    snapshot_rx: watch::Receiver<RunSnapshot>,
    handle: JoinHandle<Result<()>>,
}

impl RunManager {
    /// Spawn the runtime task with an executor built by `make_executor`.
    ///
    /// `make_executor` receives the sender the executor reports job start
    /// and completion through.
    pub fn start<E, F>(
        scheduler: Scheduler,
        store: Box<dyn JobStore>,
        options: RuntimeOptions,
        make_executor: F,
    ) -> Self
    where
        E: ExecutorBackend + 'static,
        F: FnOnce(mpsc::Sender<RuntimeEvent>) -> E,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let core = CoreRuntime::new(scheduler, options);
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());

        let executor = make_executor(tx.clone());
        let runtime = Runtime::new(core, rx, executor, store, snapshot_tx);
        let handle = tokio::spawn(runtime.run());

        Self {
            tx,
            snapshot_rx,
            handle,
        }
    }

    /// Spawn the runtime with the process-based executor.
    pub fn start_local(scheduler: Scheduler, store: Box<dyn JobStore>, options: RuntimeOptions) -> Self {
        Self::start(scheduler, store, options, RealExecutorBackend::new)
    }

    /// Move the tree rooted at `root` out of `graph` into the manager.
    ///
    /// Returns once the tree is scheduled; jobs that can start are already
    /// dispatched by then.
    pub async fn enqueue(&self, graph: JobGraph, root: JobId, force: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Enqueue {
            graph,
            root,
            force,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RunManagerError::RuntimeStopped)?
    }

    /// Move several trees into the manager in one runtime step.
    ///
    /// With `exit_when_settled` the runtime only exits once every tree of
    /// the batch settled, also when the first one is up to date already.
    pub async fn enqueue_all(&self, trees: Vec<(JobGraph, JobId)>, force: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::EnqueueAll {
            trees,
            force,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RunManagerError::RuntimeStopped)?
    }

    /// Schedule an enqueued tree again; `force` reruns every job.
    pub async fn requeue(&self, root: JobId, force: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Requeue { root, force, reply }).await?;
        rx.await.map_err(|_| RunManagerError::RuntimeStopped)?
    }

    /// Take an idle tree back out of the manager.
    pub async fn dequeue(&self, root: JobId) -> Result<JobGraph> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Dequeue { root, reply }).await?;
        rx.await.map_err(|_| RunManagerError::RuntimeStopped)?
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        self.send(RuntimeEvent::SetPaused(paused)).await
    }

    pub async fn request_stop(&self, id: JobId) -> Result<()> {
        self.send(RuntimeEvent::RequestStop(id)).await
    }

    /// Wait until every enqueued tree has settled, or the runtime stopped.
    pub async fn wait_for_finished(&self) -> Result<RunSnapshot> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx
            .wait_for(|s| s.all_settled() || s.stopped)
            .await
            .map_err(|_| RunManagerError::RuntimeStopped)?;
        Ok(snapshot.clone())
    }

    /// Like [`Self::wait_for_finished`], giving up after `timeout`.
    ///
    /// Returns `false` when the timeout elapsed first.
    pub async fn wait_for_finished_timeout(&self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.wait_for_finished()).await {
            Ok(res) => res.map(|_| true),
            Err(_) => {
                debug!(?timeout, "timed out waiting for job trees to settle");
                Ok(false)
            }
        }
    }

    pub fn tree_status(&self, root: JobId) -> Option<TreeStatus> {
        self.snapshot_rx.borrow().tree(root).map(|t| t.status)
    }

    pub fn tree_last_run(&self, root: JobId) -> Option<DateTime<Utc>> {
        self.snapshot_rx.borrow().tree(root).and_then(|t| t.last_run)
    }

    pub fn job(&self, id: JobId) -> Option<JobView> {
        self.snapshot_rx.borrow().jobs.get(&id).cloned()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Sender for raw runtime events (e.g. a Ctrl-C handler).
    pub fn event_sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.tx.clone()
    }

    /// Stop running jobs, then wait for the runtime task to exit.
    pub async fn shutdown(self) -> Result<()> {
        // A runtime that already exited has nothing left to stop.
        let _ = self.tx.send(RuntimeEvent::ShutdownRequested).await;
        self.join().await
    }

    /// Wait for the runtime task to exit on its own.
    pub async fn join(self) -> Result<()> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| RunManagerError::Other(e.into()))?
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RunManagerError::RuntimeStopped)
    }
}
