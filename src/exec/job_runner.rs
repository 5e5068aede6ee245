// src/exec/job_runner.rs

//! Individual job runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dag::dispatch::{CleanupPolicy, DispatchedJob, Launch, ProcessSpec, SplitSpec};
use crate::engine::{JobOutcome, JobReport, RuntimeEvent};
use crate::errors::{Result, RunManagerError};
use crate::exec::in_process;
use crate::job::files::{FileInfo, Files};
use crate::types::JobId;

/// Run a single dispatched job and emit exactly one `JobCompleted` event.
///
/// - Errors before or while launching (prepare steps, spawn failure) are
///   reported as a failed outcome carrying the error message.
/// - If the cancel channel fires, the process is killed and the job is
///   reported canceled.
pub async fn run_job(
    job: DispatchedJob,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) {
    let id = job.id;
    let outcome = match run_job_inner(job, &runtime_tx, cancel_rx).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(job = %id, error = %err, "job execution error");
            JobOutcome::Failed(JobReport::with_message(err.to_string()))
        }
    };

    if runtime_tx
        .send(RuntimeEvent::JobCompleted { job: id, outcome })
        .await
        .is_err()
    {
        debug!(job = %id, "runtime gone before job completion could be reported");
    }
}

async fn run_job_inner(
    job: DispatchedJob,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
) -> Result<JobOutcome> {
    info!(
        job = %job.id,
        kind = %job.kind,
        description = %job.description,
        "starting job"
    );

    tokio::fs::create_dir_all(&job.work_dir)
        .await
        .with_context(|| format!("creating work dir {:?}", job.work_dir))?;

    let _ = runtime_tx.send(RuntimeEvent::JobStarted { job: job.id }).await;

    match &job.launch {
        Launch::Noop => Ok(JobOutcome::Succeeded(JobReport::default())),
        Launch::Split(spec) => run_split(job.id, spec.clone(), cancel_rx).await,
        Launch::Process(spec) => run_process(&job, spec, cancel_rx).await,
    }
}

async fn run_split(
    id: JobId,
    spec: SplitSpec,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<JobOutcome> {
    let work = tokio::task::spawn_blocking(move || in_process::split_file(&spec));

    tokio::select! {
        joined = work => {
            let outputs = joined.context("split task panicked")??;
            info!(job = %id, parts = outputs.len(), "split finished");
            Ok(JobOutcome::Succeeded(JobReport {
                outputs: outputs.into_iter().map(FileInfo::new).collect(),
                ..JobReport::default()
            }))
        }
        _ = &mut cancel_rx => {
            info!(job = %id, "cancellation requested during split");
            Ok(JobOutcome::Canceled)
        }
    }
}

async fn run_process(
    job: &DispatchedJob,
    spec: &ProcessSpec,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<JobOutcome> {
    let work_dir = job.work_dir.clone();
    let steps = spec.prepare.clone();
    let materialized =
        tokio::task::spawn_blocking(move || in_process::prepare_work_dir(&work_dir, &steps))
            .await
            .context("prepare task panicked")??;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&job.work_dir)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        RunManagerError::ProcessSpawnFailure(format!("{}: {e}", spec.program.display()))
    })?;

    info!(
        job = %job.id,
        program = %spec.program.display(),
        args = ?spec.args,
        pid = ?child.id(),
        "process started"
    );

    let stdout = child.stdout.take().map(|s| capture(job.id, "stdout", s));
    let stderr = child.stderr.take().map(|s| capture(job.id, "stderr", s));

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of job {}", job.id))?;

            let report = JobReport {
                exit_code: status.code(),
                stdout: collect(stdout).await,
                stderr: collect(stderr).await,
                ..JobReport::default()
            };

            info!(
                job = %job.id,
                exit_code = ?report.exit_code,
                success = status.success(),
                "process exited"
            );

            if !status.success() {
                return Ok(JobOutcome::Failed(report));
            }

            let outputs = list_outputs(&job.work_dir, &materialized).await?;
            if job.cleanup == CleanupPolicy::RemoveMaterializedInputs {
                cleanup(job.id, materialized).await;
            }
            Ok(JobOutcome::Succeeded(JobReport { outputs, ..report }))
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(job = %job.id, "cancellation requested; killing process"),
                Err(_) => debug!(job = %job.id, "executor dropped cancel channel; killing process"),
            }
            if let Err(e) = child.kill().await {
                warn!(job = %job.id, error = %e, "failed to kill child process on cancellation");
            }
            Ok(JobOutcome::Canceled)
        }
    }
}

/// Consume a child stream line by line so its pipe never fills.
fn capture<R>(id: JobId, stream: &'static str, reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut out = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(job = %id, stream, "{}", line);
            out.push_str(&line);
            out.push('\n');
        }
        out
    })
}

async fn collect(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(h) => h.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Regular files left in the working directory, minus materialized inputs.
async fn list_outputs(work_dir: &Path, materialized: &[PathBuf]) -> Result<Files> {
    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .with_context(|| format!("listing outputs in {:?}", work_dir))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if materialized.contains(&path) || !entry.file_type().await?.is_file() {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths.into_iter().map(FileInfo::new).collect())
}

async fn cleanup(id: JobId, materialized: Vec<PathBuf>) {
    let failures =
        tokio::task::spawn_blocking(move || in_process::remove_materialized(&materialized)).await;
    match failures {
        Ok(failures) => {
            for (path, err) in failures {
                warn!(job = %id, path = ?path, error = %err, "failed to remove materialized input");
            }
        }
        Err(e) => warn!(job = %id, error = %e, "cleanup task panicked"),
    }
}
