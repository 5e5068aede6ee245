// src/job/kind.rs

//! Per-kind job behaviour.
//!
//! Every job carries one [`JobHandler`], picked from the
//! [`crate::job::JobFactory`] registry by its [`JobType`] tag. The handler
//! decides how the job is described, which tools it needs, how it is
//! launched, what it hands to dependents and which temp files it removes.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::dag::dispatch::{CleanupPolicy, Launch, PrepareStep, ProcessSpec, SplitSpec};
use crate::errors::{Result, RunManagerError};
use crate::exec::in_process::split_output_paths;
use crate::fs::FileSystem;
use crate::job::files::Files;
use crate::job::tools::{ToolRequirement, ToolResolver, ToolVersion};
use crate::job::Job;
use crate::types::JobType;

/// Parameter keys understood by the built-in handlers.
pub mod keys {
    pub const DESCRIPTION: &str = "description";
    pub const TOOL: &str = "tool";
    pub const TOOL_VERSION: &str = "tool_version";
    pub const ARG: &str = "arg";
    pub const NUM_SPLITS: &str = "numsplits";
    pub const OFFSET: &str = "offset";
    pub const INPUT_TYPE: &str = "input_type";
    pub const DAKOTA_VERSION: &str = "dakota_version";
    pub const NESTED_TOOL: &str = "nested_tool";
}

pub const XML_PREPROCESSOR_TOOL: &str = "xmlpreprocessor";
pub const DAKOTA_TOOL: &str = "dakota";

/// Everything a handler may look at when preparing a launch.
pub struct StartContext<'a> {
    pub job: &'a Job,
    /// Own input files followed by the outputs of upstream jobs.
    pub inputs: &'a Files,
    pub work_dir: &'a Path,
    pub tools: &'a dyn ToolResolver,
}

pub trait JobHandler: Send + Sync + fmt::Debug {
    fn job_type(&self) -> JobType;

    fn description(&self, job: &Job) -> String;

    /// Aggregate versioned tool requirements of the job.
    fn tool_requirements(&self, _job: &Job) -> Result<Vec<ToolRequirement>> {
        Ok(Vec::new())
    }

    /// Type tag that must be present among the job's inputs.
    fn required_input_type(&self, _job: &Job) -> Option<String> {
        None
    }

    /// Resolve tools and describe how the job is launched.
    fn start_handler(&self, ctx: &StartContext<'_>) -> Result<Launch>;

    /// Files exposed to dependents, given what the run reported.
    fn output_files(&self, reported: &Files, _inputs: &Files) -> Files {
        reported.clone()
    }

    /// Kind-specific staleness on top of the generic input checks.
    ///
    /// By default a job is stale when an output it recorded has vanished.
    fn out_of_date_impl(&self, job: &Job, fs: &dyn FileSystem) -> bool {
        job.output_files().iter().any(|f| !fs.exists(&f.path))
    }

    fn cleanup(&self) -> CleanupPolicy {
        CleanupPolicy::KeepAll
    }
}

fn described(job: &Job, default: String) -> String {
    job.params()
        .get(keys::DESCRIPTION)
        .map(str::to_string)
        .unwrap_or(default)
}

fn tool_version_param(job: &Job, key: &str) -> Result<ToolVersion> {
    match job.params().get(key) {
        Some(v) => v.parse(),
        None => Ok(ToolVersion::any()),
    }
}

fn args_param(job: &Job) -> Vec<String> {
    job.params()
        .get_all(keys::ARG)
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Copy steps placing every input (and its required files) in the working
/// directory. Later inputs win when two share a file name.
fn materialize(inputs: &Files) -> Vec<PrepareStep> {
    let mut by_target: HashMap<PathBuf, usize> = HashMap::new();
    let mut steps: Vec<PrepareStep> = Vec::new();

    let mut add = |from: PathBuf, to: PathBuf| {
        let step = PrepareStep::Copy {
            from,
            to: to.clone(),
        };
        match by_target.get(&to) {
            Some(&idx) => steps[idx] = step,
            None => {
                by_target.insert(to, steps.len());
                steps.push(step);
            }
        }
    };

    for file in inputs.iter() {
        add(file.path.clone(), PathBuf::from(&file.filename));
        for req in &file.required_files {
            add(req.source.clone(), req.target.clone());
        }
    }

    steps
}

fn resolve_all(
    tools: &dyn ToolResolver,
    requirements: &[ToolRequirement],
) -> Result<Vec<(String, PathBuf)>> {
    requirements
        .iter()
        .map(|r| tools.resolve(&r.name, &r.version).map(|p| (r.name.clone(), p)))
        .collect()
}

/// Generic external executable.
#[derive(Debug, Default)]
pub struct ToolBasedHandler;

impl ToolBasedHandler {
    fn requirement(job: &Job) -> Result<ToolRequirement> {
        let name = job.params().get(keys::TOOL).ok_or_else(|| {
            RunManagerError::InvalidParameter(format!("job {} has no 'tool' parameter", job.id()))
        })?;
        Ok(ToolRequirement::new(
            name,
            tool_version_param(job, keys::TOOL_VERSION)?,
        ))
    }
}

impl JobHandler for ToolBasedHandler {
    fn job_type(&self) -> JobType {
        JobType::ToolBased
    }

    fn description(&self, job: &Job) -> String {
        let tool = job.params().get(keys::TOOL).unwrap_or("<no tool>");
        described(job, format!("run {tool}"))
    }

    fn tool_requirements(&self, job: &Job) -> Result<Vec<ToolRequirement>> {
        Ok(vec![Self::requirement(job)?])
    }

    fn start_handler(&self, ctx: &StartContext<'_>) -> Result<Launch> {
        let req = Self::requirement(ctx.job)?;
        let program = ctx.tools.resolve(&req.name, &req.version)?;

        Ok(Launch::Process(ProcessSpec {
            program,
            args: args_param(ctx.job),
            env: Vec::new(),
            prepare: materialize(ctx.inputs),
        }))
    }

    fn cleanup(&self) -> CleanupPolicy {
        CleanupPolicy::RemoveMaterializedInputs
    }
}

/// Structural no-op; passes its inputs through.
#[derive(Debug, Default)]
pub struct NullHandler;

impl JobHandler for NullHandler {
    fn job_type(&self) -> JobType {
        JobType::Null
    }

    fn description(&self, job: &Job) -> String {
        described(job, "null job".to_string())
    }

    fn start_handler(&self, _ctx: &StartContext<'_>) -> Result<Launch> {
        Ok(Launch::Noop)
    }

    fn output_files(&self, _reported: &Files, inputs: &Files) -> Files {
        inputs.clone()
    }

    fn out_of_date_impl(&self, _job: &Job, _fs: &dyn FileSystem) -> bool {
        false
    }
}

/// Fans one input out into `numsplits` chunk files for parallel runs.
#[derive(Debug, Default)]
pub struct ParallelSplitHandler;

impl ParallelSplitHandler {
    fn num_splits(job: &Job) -> Result<usize> {
        match job.params().get_parsed::<usize>(keys::NUM_SPLITS)? {
            Some(n) if n >= 1 => Ok(n),
            Some(n) => Err(RunManagerError::InvalidParameter(format!(
                "numsplits must be >= 1 (got {n})"
            ))),
            None => Err(RunManagerError::InvalidParameter(
                "split job requires a 'numsplits' parameter".to_string(),
            )),
        }
    }
}

impl JobHandler for ParallelSplitHandler {
    fn job_type(&self) -> JobType {
        JobType::ParallelSplit
    }

    fn description(&self, job: &Job) -> String {
        let n = job.params().get(keys::NUM_SPLITS).unwrap_or("?");
        described(job, format!("split input into {n} parts"))
    }

    fn required_input_type(&self, job: &Job) -> Option<String> {
        job.params().get(keys::INPUT_TYPE).map(str::to_string)
    }

    fn start_handler(&self, ctx: &StartContext<'_>) -> Result<Launch> {
        let num = Self::num_splits(ctx.job)?;
        let offset = ctx
            .job
            .params()
            .get_parsed::<usize>(keys::OFFSET)?
            .unwrap_or(0);

        let input = match self.required_input_type(ctx.job) {
            Some(tag) => ctx.inputs.last_by_type(&tag)?,
            None => ctx.inputs.last().ok_or_else(|| {
                RunManagerError::InputFileMissing("split job has no input file".to_string())
            })?,
        };

        Ok(Launch::Split(SplitSpec {
            input: input.path.clone(),
            outputs: split_output_paths(ctx.work_dir, &input.path, num, offset),
        }))
    }

    fn out_of_date_impl(&self, job: &Job, fs: &dyn FileSystem) -> bool {
        let expected = Self::num_splits(job).unwrap_or(0);
        let outputs = job.output_files();
        outputs.len() != expected || outputs.iter().any(|f| !fs.exists(&f.path))
    }
}

/// Merges an XML document with its includes, then runs the preprocessor.
#[derive(Debug, Default)]
pub struct XmlPreprocessorHandler;

impl JobHandler for XmlPreprocessorHandler {
    fn job_type(&self) -> JobType {
        JobType::XmlPreprocessor
    }

    fn description(&self, job: &Job) -> String {
        described(job, "preprocess xml".to_string())
    }

    fn tool_requirements(&self, _job: &Job) -> Result<Vec<ToolRequirement>> {
        Ok(vec![ToolRequirement::new(
            XML_PREPROCESSOR_TOOL,
            ToolVersion::any(),
        )])
    }

    fn required_input_type(&self, _job: &Job) -> Option<String> {
        Some("xml".to_string())
    }

    fn start_handler(&self, ctx: &StartContext<'_>) -> Result<Launch> {
        let program = ctx
            .tools
            .resolve(XML_PREPROCESSOR_TOOL, &ToolVersion::any())?;
        let xml = ctx.inputs.last_by_type("xml")?;

        let include_dir = xml.path.parent().map(|p| p.join("include"));
        let mut prepare = vec![PrepareStep::MergeXml {
            source: xml.path.clone(),
            include_dir,
            to: PathBuf::from("in.xml"),
        }];
        for req in &xml.required_files {
            prepare.push(PrepareStep::Copy {
                from: req.source.clone(),
                to: req.target.clone(),
            });
        }

        let mut args = args_param(ctx.job);
        if args.is_empty() {
            args.push("in.xml".to_string());
        }

        Ok(Launch::Process(ProcessSpec {
            program,
            args,
            env: Vec::new(),
            prepare,
        }))
    }
}

/// Drives an external parametric-analysis driver that spawns nested
/// evaluations itself.
#[derive(Debug, Default)]
pub struct DakotaHandler;

impl DakotaHandler {
    fn env_name(tool: &str) -> String {
        let cleaned: String = tool
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("RUNMANAGER_TOOL_{cleaned}")
    }
}

impl JobHandler for DakotaHandler {
    fn job_type(&self) -> JobType {
        JobType::Dakota
    }

    fn description(&self, job: &Job) -> String {
        described(job, "dakota analysis".to_string())
    }

    fn tool_requirements(&self, job: &Job) -> Result<Vec<ToolRequirement>> {
        let mut reqs = vec![ToolRequirement::new(
            DAKOTA_TOOL,
            tool_version_param(job, keys::DAKOTA_VERSION)?,
        )];
        for nested in job.params().get_all(keys::NESTED_TOOL) {
            let req: ToolRequirement = nested.parse()?;
            if !reqs.contains(&req) {
                reqs.push(req);
            }
        }
        Ok(reqs)
    }

    fn required_input_type(&self, _job: &Job) -> Option<String> {
        Some("in".to_string())
    }

    fn start_handler(&self, ctx: &StartContext<'_>) -> Result<Launch> {
        let reqs = self.tool_requirements(ctx.job)?;
        let resolved = resolve_all(ctx.tools, &reqs)?;
        let input = ctx.inputs.last_by_type("in")?;

        let mut program = PathBuf::new();
        let mut env = Vec::new();
        for (name, path) in resolved {
            if name == DAKOTA_TOOL {
                program = path;
            } else {
                env.push((Self::env_name(&name), path.to_string_lossy().into_owned()));
            }
        }

        let mut args = vec![
            "-i".to_string(),
            input.filename.clone(),
            "-o".to_string(),
            "dakota.out".to_string(),
        ];
        args.extend(args_param(ctx.job));

        Ok(Launch::Process(ProcessSpec {
            program,
            args,
            env,
            prepare: materialize(ctx.inputs),
        }))
    }
}
