// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake executor.
//!
//! - `RealExecutorBackend` is the production implementation. It wraps the
//!   executor loop and forwards run and cancel requests over a channel.
//! - Tests provide their own `ExecutorBackend` that, for example, records
//!   which jobs were dispatched and directly emits `JobCompleted` events.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::dispatch::DispatchedJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::types::JobId;

use super::executor_loop::{spawn_executor, ExecutorRequest};

/// Trait abstracting how dispatched jobs are executed.
///
/// Every dispatched job must eventually produce exactly one
/// `RuntimeEvent::JobCompleted`, including jobs that are canceled.
pub trait ExecutorBackend: Send {
    /// Start the given jobs.
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<DispatchedJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop a running job; it must then be reported as canceled.
    fn cancel_job(&mut self, id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorRequest>,
}

impl RealExecutorBackend {
    /// Create a new backend wired to the given runtime event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        let tx = spawn_executor(runtime_tx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<DispatchedJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(ExecutorRequest::Run(job))
                    .await
                    .map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel_job(&mut self, id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ExecutorRequest::Cancel(id))
                .await
                .map_err(Error::from)?;
            Ok(())
        })
    }
}
