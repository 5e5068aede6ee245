// src/exec/mod.rs

//! Job execution layer.
//!
//! This module is responsible for actually running dispatched jobs, using
//! `tokio::process::Command` for external tools, and reporting back to the
//! orchestration runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` used in production; tests replace it with a fake.
//! - [`executor_loop`] owns the loop that tracks running jobs and their
//!   cancel channels.
//! - [`job_runner`] prepares the working directory and runs one job.
//! - [`in_process`] implements the work done without an external tool.

pub mod backend;
pub mod executor_loop;
pub mod in_process;
pub mod job_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::spawn_executor;
