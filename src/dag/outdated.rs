// src/dag/outdated.rs

//! Out-of-date detection.
//!
//! A job is re-run when any of the following holds (checked in this order):
//! it is forced, it never ran, its last run failed, an upstream job ran after
//! it, the set of tracked input files changed, a tracked input's contents
//! changed, or a kind-specific check (usually "an output vanished") fires.
//!
//! Content checks are cheap when nothing moved: equal size and modification
//! time skip hashing entirely, otherwise the blake3 checksum decides.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::checksum::compute_file_hash;
use crate::errors::{Result, RunManagerError};
use crate::fs::FileSystem;
use crate::job::files::Files;
use crate::job::state::FileTrack;
use crate::job::Job;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfDateReason {
    Forced,
    NeverRun,
    PreviousRunFailed,
    UpstreamNewer,
    InputsChanged,
    ChecksumMismatch(PathBuf),
    OutputsMissing,
}

impl fmt::Display for OutOfDateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutOfDateReason::Forced => write!(f, "forced"),
            OutOfDateReason::NeverRun => write!(f, "never run"),
            OutOfDateReason::PreviousRunFailed => write!(f, "previous run failed"),
            OutOfDateReason::UpstreamNewer => write!(f, "upstream job ran more recently"),
            OutOfDateReason::InputsChanged => write!(f, "set of input files changed"),
            OutOfDateReason::ChecksumMismatch(p) => write!(f, "contents of {} changed", p.display()),
            OutOfDateReason::OutputsMissing => write!(f, "outputs missing"),
        }
    }
}

/// Decide whether `job` must run, given the inputs it would be handed.
///
/// Returns `Ok(None)` when the recorded run is still valid, and
/// `Err(InputFileMissing)` when an input the job needs does not exist.
pub fn check(
    job: &Job,
    inputs: &Files,
    upstream_last_run: Option<DateTime<Utc>>,
    forced: bool,
    fs: &dyn FileSystem,
) -> Result<Option<OutOfDateReason>> {
    ensure_inputs_present(job, inputs, fs)?;

    if forced {
        return Ok(Some(OutOfDateReason::Forced));
    }

    let state = job.state();
    let last_run = match state.last_run {
        Some(t) => t,
        None => return Ok(Some(OutOfDateReason::NeverRun)),
    };

    if !state.errors.succeeded() {
        return Ok(Some(OutOfDateReason::PreviousRunFailed));
    }

    if upstream_last_run.is_some_and(|up| up > last_run) {
        return Ok(Some(OutOfDateReason::UpstreamNewer));
    }

    let tracked: BTreeSet<&Path> = state.tracked_files.iter().map(|t| t.path.as_path()).collect();
    let current: BTreeSet<&Path> = trackable(inputs, fs).collect();
    if tracked != current {
        debug!(job = %job.id(), ?tracked, ?current, "tracked input set differs");
        return Ok(Some(OutOfDateReason::InputsChanged));
    }

    for track in &state.tracked_files {
        if track_changed(track, fs)? {
            return Ok(Some(OutOfDateReason::ChecksumMismatch(track.path.clone())));
        }
    }

    if job.handler().out_of_date_impl(job, fs) {
        return Ok(Some(OutOfDateReason::OutputsMissing));
    }

    Ok(None)
}

/// Record checksum, size and modification time of every trackable input.
pub fn capture_tracks(inputs: &Files, fs: &dyn FileSystem) -> Result<Vec<FileTrack>> {
    let mut seen = BTreeSet::new();
    let mut tracks = Vec::new();
    for path in trackable(inputs, fs) {
        if !seen.insert(path) {
            continue;
        }
        let meta = fs.metadata(path)?;
        tracks.push(FileTrack {
            path: path.to_path_buf(),
            checksum: compute_file_hash(fs, path)?,
            modified: meta.modified.map(DateTime::<Utc>::from),
            size: meta.size,
        });
    }
    Ok(tracks)
}

/// Input paths whose contents are tracked. Directories are not.
fn trackable<'a>(inputs: &'a Files, fs: &'a dyn FileSystem) -> impl Iterator<Item = &'a Path> + 'a {
    inputs
        .iter()
        .map(|f| f.path.as_path())
        .filter(move |p| fs.is_file(p))
}

fn ensure_inputs_present(job: &Job, inputs: &Files, fs: &dyn FileSystem) -> Result<()> {
    for file in job.input_files().iter() {
        if !fs.exists(&file.path) {
            return Err(RunManagerError::InputFileMissing(format!(
                "{} (input of job {})",
                file.path.display(),
                job.id()
            )));
        }
        for req in &file.required_files {
            if !fs.exists(&req.source) {
                return Err(RunManagerError::InputFileMissing(format!(
                    "{} (required by {})",
                    req.source.display(),
                    file.path.display()
                )));
            }
        }
    }

    if let Some(tag) = job.handler().required_input_type(job) {
        inputs.last_by_type(&tag)?;
    }

    Ok(())
}

fn track_changed(track: &FileTrack, fs: &dyn FileSystem) -> Result<bool> {
    if !fs.exists(&track.path) {
        return Err(RunManagerError::InputFileMissing(
            track.path.display().to_string(),
        ));
    }

    let meta = fs.metadata(&track.path)?;
    let modified = meta.modified.map(DateTime::<Utc>::from);
    if meta.size == track.size && modified.is_some() && modified == track.modified {
        return Ok(false);
    }

    let checksum = compute_file_hash(fs, &track.path)?;
    debug!(
        path = ?track.path,
        old = %track.checksum,
        new = %checksum,
        "re-hashed tracked input"
    );
    Ok(checksum != track.checksum)
}
