#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use runmanager::config::model::{
    FileSection, JobSection, ManagerSection, ParamSection, RawWorkflowFile, ToolSection,
    WorkflowFile,
};
use runmanager::dag::JobGraph;
use runmanager::job::kind::keys;
use runmanager::job::{Files, JobFactory, JobParams, Tools};
use runmanager::types::{JobId, JobType};

/// Builds a job graph from named jobs, for driving the scheduler directly.
pub struct GraphBuilder {
    factory: JobFactory,
    graph: JobGraph,
    names: BTreeMap<String, JobId>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::with_factory(JobFactory::new())
    }

    pub fn with_factory(factory: JobFactory) -> Self {
        Self {
            factory,
            graph: JobGraph::new(),
            names: BTreeMap::new(),
        }
    }

    /// Job of any kind with explicit parameters and per-job tools.
    pub fn job_with_tools(
        mut self,
        name: &str,
        kind: JobType,
        params: JobParams,
        files: Files,
        tools: Tools,
    ) -> Self {
        let id = JobId::from_name(name);
        let job = self
            .factory
            .create_with_id(id, kind, params, files, tools)
            .expect("builtin kinds are always registered");
        self.graph.insert(job);
        self.names.insert(name.to_string(), id);
        self
    }

    pub fn job(self, name: &str, kind: JobType, params: JobParams, files: Files) -> Self {
        self.job_with_tools(name, kind, params, files, Tools::new())
    }

    pub fn null(self, name: &str) -> Self {
        self.job(name, JobType::Null, JobParams::new(), Files::new())
    }

    /// Tool job resolving `tool` from `tools` and the scheduler registry.
    pub fn tool(self, name: &str, tool: &str, files: Files, tools: Tools) -> Self {
        let params = JobParams::new().with(keys::TOOL, tool);
        self.job_with_tools(name, JobType::ToolBased, params, files, tools)
    }

    pub fn child(mut self, parent: &str, child: &str) -> Self {
        let (p, c) = (self.id(parent), self.id(child));
        self.graph.add_child(p, c).expect("valid child edge");
        self
    }

    /// Chain `names` as parent -> child -> grandchild ...
    pub fn chain(mut self, names: &[&str]) -> Self {
        for pair in names.windows(2) {
            self = self.child(pair[0], pair[1]);
        }
        self
    }

    pub fn finished(mut self, parent: &str, job: &str) -> Self {
        let (p, f) = (self.id(parent), self.id(job));
        self.graph.set_finished_job(p, f).expect("valid finished edge");
        self
    }

    pub fn with_out_dir(mut self, name: &str, dir: impl Into<PathBuf>) -> Self {
        let id = self.id(name);
        if let Some(job) = self.graph.get_mut(id) {
            job.set_out_dir(dir);
        }
        self
    }

    pub fn id(&self, name: &str) -> JobId {
        *self
            .names
            .get(name)
            .unwrap_or_else(|| panic!("unknown job '{name}' in builder"))
    }

    pub fn build(self) -> (JobGraph, BTreeMap<String, JobId>) {
        (self.graph, self.names)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkflowFile` to simplify test setup.
pub struct WorkflowFileBuilder {
    workflow: RawWorkflowFile,
}

impl WorkflowFileBuilder {
    pub fn new() -> Self {
        Self {
            workflow: RawWorkflowFile {
                manager: ManagerSection::default(),
                tools: Vec::new(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobSection) -> Self {
        self.workflow.job.insert(name.to_string(), job);
        self
    }

    pub fn with_tool(mut self, name: &str, version: &str, path: &str) -> Self {
        self.workflow.tools.push(ToolSection {
            name: name.to_string(),
            version: version.to_string(),
            path: PathBuf::from(path),
        });
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.workflow.manager.max_workers = Some(n);
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.workflow
    }

    pub fn build(self) -> WorkflowFile {
        WorkflowFile::try_from(self.workflow).expect("Failed to build valid workflow from builder")
    }
}

impl Default for WorkflowFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobSection`.
pub struct JobSectionBuilder {
    job: JobSection,
}

impl JobSectionBuilder {
    pub fn new(kind: JobType) -> Self {
        Self {
            job: JobSection {
                kind,
                children: vec![],
                finished: None,
                tool: None,
                version: None,
                args: vec![],
                files: vec![],
                params: vec![],
                numsplits: None,
                offset: None,
                description: None,
                out_dir: None,
            },
        }
    }

    pub fn null() -> Self {
        Self::new(JobType::Null)
    }

    pub fn tool(name: &str) -> Self {
        let mut b = Self::new(JobType::ToolBased);
        b.job.tool = Some(name.to_string());
        b
    }

    pub fn child(mut self, name: &str) -> Self {
        self.job.children.push(name.to_string());
        self
    }

    pub fn finished(mut self, name: &str) -> Self {
        self.job.finished = Some(name.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.job.version = Some(version.to_string());
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.job.args.push(arg.to_string());
        self
    }

    pub fn file(mut self, path: &str, type_tag: Option<&str>) -> Self {
        self.job.files.push(FileSection {
            path: PathBuf::from(path),
            type_tag: type_tag.map(str::to_string),
            required: vec![],
        });
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.job.params.push(ParamSection {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn numsplits(mut self, n: usize) -> Self {
        self.job.numsplits = Some(n);
        self
    }

    pub fn build(self) -> JobSection {
        self.job
    }
}
