use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use runmanager::dag::DispatchedJob;
use runmanager::engine::{JobOutcome, JobReport, RuntimeEvent};
use runmanager::errors::Result;
use runmanager::exec::ExecutorBackend;
use runmanager::types::JobId;

/// What the fake executor saw, shared with the test.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    dispatched: Arc<Mutex<Vec<JobId>>>,
    canceled: Arc<Mutex<Vec<JobId>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs in the order they were handed to the executor.
    pub fn dispatched(&self) -> Vec<JobId> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn canceled(&self) -> Vec<JobId> {
        self.canceled.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.dispatched.lock().unwrap().clear();
        self.canceled.lock().unwrap().clear();
    }
}

/// A fake executor that:
/// - records which jobs were dispatched
/// - reports `JobStarted` for each of them
/// - unless holding, immediately reports `JobCompleted`: failed for the
///   jobs in `failing`, succeeded otherwise
/// - reports held jobs as canceled when asked to cancel them
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    log: ExecutionLog,
    failing: HashSet<JobId>,
    hold: bool,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, log: ExecutionLog) -> Self {
        Self {
            runtime_tx,
            log,
            failing: HashSet::new(),
            hold: false,
        }
    }

    /// Report these jobs as failed with exit code 1.
    pub fn failing(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
        self.failing.extend(ids);
        self
    }

    /// Leave jobs running until the test completes or cancels them.
    pub fn holding(mut self) -> Self {
        self.hold = true;
        self
    }
}

/// Outcome the fake reports for a job that "ran".
pub fn fake_outcome(failed: bool) -> JobOutcome {
    if failed {
        JobOutcome::Failed(JobReport {
            exit_code: Some(1),
            stderr: "fake failure".to_string(),
            ..JobReport::default()
        })
    } else {
        JobOutcome::Succeeded(JobReport {
            exit_code: Some(0),
            ..JobReport::default()
        })
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(
        &mut self,
        jobs: Vec<DispatchedJob>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let log = self.log.clone();
        let failing = self.failing.clone();
        let hold = self.hold;

        Box::pin(async move {
            for job in jobs {
                log.dispatched.lock().unwrap().push(job.id);

                // Completions are sent from a task: the runtime is the one
                // awaiting this future, so it cannot drain the channel yet.
                let tx = tx.clone();
                let failed = failing.contains(&job.id);
                tokio::spawn(async move {
                    let _ = tx.send(RuntimeEvent::JobStarted { job: job.id }).await;
                    if !hold {
                        let _ = tx
                            .send(RuntimeEvent::JobCompleted {
                                job: job.id,
                                outcome: fake_outcome(failed),
                            })
                            .await;
                    }
                });
            }
            Ok(())
        })
    }

    fn cancel_job(&mut self, id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        self.log.canceled.lock().unwrap().push(id);

        Box::pin(async move {
            tokio::spawn(async move {
                let _ = tx
                    .send(RuntimeEvent::JobCompleted {
                        job: id,
                        outcome: JobOutcome::Canceled,
                    })
                    .await;
            });
            Ok(())
        })
    }
}
