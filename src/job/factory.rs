// src/job/factory.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{Result, RunManagerError};
use crate::job::files::Files;
use crate::job::kind::{
    keys, DakotaHandler, JobHandler, NullHandler, ParallelSplitHandler, ToolBasedHandler,
    XmlPreprocessorHandler,
};
use crate::job::params::JobParams;
use crate::job::tools::{ToolVersion, Tools};
use crate::job::Job;
use crate::store::JobRecord;
use crate::types::{JobId, JobType};

/// Creates jobs from a kind tag.
///
/// Holds one handler per [`JobType`]; `register` swaps the handler used for
/// a kind (tests use this to plug in custom behaviour).
#[derive(Debug, Clone)]
pub struct JobFactory {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl Default for JobFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            handlers: HashMap::new(),
        };
        factory.register(Arc::new(ToolBasedHandler));
        factory.register(Arc::new(NullHandler));
        factory.register(Arc::new(ParallelSplitHandler));
        factory.register(Arc::new(XmlPreprocessorHandler));
        factory.register(Arc::new(DakotaHandler));
        factory
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn handler(&self, kind: JobType) -> Result<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned().ok_or_else(|| {
            RunManagerError::ConfigError(format!("no handler registered for job kind '{kind}'"))
        })
    }

    pub fn create(
        &self,
        kind: JobType,
        params: JobParams,
        files: Files,
        tools: Tools,
    ) -> Result<Job> {
        self.create_with_id(JobId::new(), kind, params, files, tools)
    }

    pub fn create_with_id(
        &self,
        id: JobId,
        kind: JobType,
        params: JobParams,
        files: Files,
        tools: Tools,
    ) -> Result<Job> {
        let handler = self.handler(kind)?;
        Ok(Job::new(id, handler, params, files, tools))
    }

    pub fn create_null_job(&self) -> Job {
        Job::new(
            JobId::new(),
            self.handler_or_builtin(JobType::Null),
            JobParams::new(),
            Files::new(),
            Tools::new(),
        )
    }

    pub fn create_tool_job(
        &self,
        tool: &str,
        version: &ToolVersion,
        args: &[&str],
        files: Files,
        tools: Tools,
    ) -> Job {
        let mut params = JobParams::new().with(keys::TOOL, tool);
        if !version.is_any() {
            params.push(keys::TOOL_VERSION, version.to_string());
        }
        for arg in args {
            params.push(keys::ARG, *arg);
        }
        Job::new(
            JobId::new(),
            self.handler_or_builtin(JobType::ToolBased),
            params,
            files,
            tools,
        )
    }

    pub fn create_split_job(&self, num_splits: usize, files: Files) -> Job {
        let params = JobParams::new().with(keys::NUM_SPLITS, num_splits.to_string());
        Job::new(
            JobId::new(),
            self.handler_or_builtin(JobType::ParallelSplit),
            params,
            files,
            Tools::new(),
        )
    }

    pub fn create_xml_job(&self, files: Files, tools: Tools) -> Job {
        Job::new(
            JobId::new(),
            self.handler_or_builtin(JobType::XmlPreprocessor),
            JobParams::new(),
            files,
            tools,
        )
    }

    pub fn create_dakota_job(&self, params: JobParams, files: Files, tools: Tools) -> Job {
        Job::new(
            JobId::new(),
            self.handler_or_builtin(JobType::Dakota),
            params,
            files,
            tools,
        )
    }

    /// Rebuild a job (without edges) from a persisted record.
    pub fn restore(&self, record: &JobRecord) -> Result<Job> {
        let mut job = self.create_with_id(
            record.id,
            record.kind,
            record.params.clone(),
            record.input_files.clone(),
            record.tools.clone(),
        )?;
        if let Some(dir) = &record.out_dir {
            job.set_out_dir(dir);
        }
        job.restore_state(record.state.clone());
        Ok(job)
    }

    fn handler_or_builtin(&self, kind: JobType) -> Arc<dyn JobHandler> {
        if let Some(h) = self.handlers.get(&kind) {
            return Arc::clone(h);
        }
        match kind {
            JobType::ToolBased => Arc::new(ToolBasedHandler),
            JobType::Null => Arc::new(NullHandler),
            JobType::ParallelSplit => Arc::new(ParallelSplitHandler),
            JobType::XmlPreprocessor => Arc::new(XmlPreprocessorHandler),
            JobType::Dakota => Arc::new(DakotaHandler),
        }
    }
}
