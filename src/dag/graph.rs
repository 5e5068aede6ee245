// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::errors::{Result, RunManagerError};
use crate::job::Job;
use crate::types::JobId;

/// Arena of jobs keyed by id.
///
/// Edges live on the jobs themselves as id lists:
/// - `children` run after their parent succeeds,
/// - `finished_job` runs after the parent's whole completion set succeeds.
///
/// A finished job may be attached to several parents; it then waits for all
/// of them (join). Insertion order is kept so iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: HashMap<JobId, Job>,
    order: Vec<JobId>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a job, returning its id.
    pub fn insert(&mut self, job: Job) -> JobId {
        let id = job.id();
        if self.jobs.insert(id, job).is_none() {
            self.order.push(id);
        }
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job ids in insertion order.
    pub fn ids(&self) -> &[JobId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    fn require(&self, id: JobId) -> Result<&Job> {
        self.jobs.get(&id).ok_or(RunManagerError::JobNotFound(id))
    }

    /// Attach `child` under `parent`.
    ///
    /// Fails without mutating anything when either id is unknown, when the
    /// edge would close a cycle, or when `child` is already attached
    /// somewhere (as a child or as a finished job).
    pub fn add_child(&mut self, parent: JobId, child: JobId) -> Result<()> {
        self.require(parent)?;
        let c = self.require(child)?;

        if let Some(existing) = c.parent {
            return Err(RunManagerError::AttachConflict(format!(
                "job {child} is already a child of {existing}"
            )));
        }
        if !c.finished_parents.is_empty() {
            return Err(RunManagerError::AttachConflict(format!(
                "job {child} is a finished job and cannot also be a child"
            )));
        }
        if parent == child || self.reaches(child, parent) {
            return Err(RunManagerError::CycleDetected(format!(
                "adding {child} as child of {parent}"
            )));
        }

        if let Some(c) = self.jobs.get_mut(&child) {
            c.parent = Some(parent);
        }
        if let Some(p) = self.jobs.get_mut(&parent) {
            p.children.push(child);
        }
        debug!(parent = %parent, child = %child, "attached child");
        Ok(())
    }

    /// Attach `finished` as the finished job of `parent`, returning the
    /// finished job it replaced (now detached from `parent`).
    pub fn set_finished_job(&mut self, parent: JobId, finished: JobId) -> Result<Option<JobId>> {
        let p = self.require(parent)?;
        let f = self.require(finished)?;

        if p.finished_job == Some(finished) {
            return Ok(None);
        }
        if let Some(owner) = f.parent {
            return Err(RunManagerError::AttachConflict(format!(
                "job {finished} is a child of {owner} and cannot also be a finished job"
            )));
        }
        if parent == finished || self.reaches(finished, parent) {
            return Err(RunManagerError::CycleDetected(format!(
                "setting {finished} as finished job of {parent}"
            )));
        }

        let previous = self.jobs.get_mut(&parent).and_then(|p| {
            let prev = p.finished_job.take();
            p.finished_job = Some(finished);
            prev
        });
        if let Some(prev) = previous {
            if let Some(old) = self.jobs.get_mut(&prev) {
                old.finished_parents.retain(|id| *id != parent);
            }
        }
        if let Some(f) = self.jobs.get_mut(&finished) {
            f.finished_parents.push(parent);
        }

        debug!(parent = %parent, finished = %finished, replaced = ?previous, "attached finished job");
        Ok(previous)
    }

    /// Whether `to` is reachable from `from` over child and finished edges.
    fn reaches(&self, from: JobId, to: JobId) -> bool {
        self.walk(from, true).contains(&to)
    }

    fn outgoing(&self, id: JobId, include_finished: bool) -> Vec<JobId> {
        let Some(job) = self.jobs.get(&id) else {
            return Vec::new();
        };
        let mut next = job.children.clone();
        if include_finished {
            next.extend(job.finished_job);
        }
        next
    }

    /// BFS from `start`; the start node's own finished edge is followed only
    /// when `start_finished` is set.
    fn walk(&self, start: JobId, start_finished: bool) -> Vec<JobId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::new();

        if !self.jobs.contains_key(&start) {
            return out;
        }
        seen.insert(start);
        out.push(start);
        for next in self.outgoing(start, start_finished) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }

        while let Some(id) = queue.pop_front() {
            // Edges may name jobs that live in another arena.
            if !self.jobs.contains_key(&id) {
                continue;
            }
            out.push(id);
            for next in self.outgoing(id, true) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        out
    }

    /// Every job reachable from `root`, root first, without duplicates.
    pub fn tree_members(&self, root: JobId) -> Vec<JobId> {
        self.walk(root, true)
    }

    /// First edge that ties the tree at `root` to a job outside it, as
    /// `(member, outside)`: a parent above the root, or an attaching node of
    /// a finished job that the tree does not contain.
    pub fn outside_attachment(&self, root: JobId) -> Option<(JobId, JobId)> {
        let members: HashSet<JobId> = self.tree_members(root).into_iter().collect();
        self.tree_members(root).into_iter().find_map(|id| {
            let job = self.jobs.get(&id)?;
            job.parent
                .iter()
                .chain(&job.finished_parents)
                .find(|up| !members.contains(*up))
                .map(|up| (id, *up))
        })
    }

    /// `node`, its transitive children and their finished subtrees.
    ///
    /// `node`'s own finished job is excluded: it is what waits on this set.
    pub fn completion_set(&self, node: JobId) -> Vec<JobId> {
        self.walk(node, false)
    }

    /// Jobs a job waits on before it may run.
    ///
    /// A child depends on its parent; a finished job depends on the
    /// completion set of every node it is attached to, minus its own subtree
    /// (a finished job may sit inside another attaching node's set). An
    /// attaching node missing from this arena is returned as is, so the job
    /// keeps waiting on it.
    pub fn dependencies(&self, id: JobId) -> Vec<JobId> {
        let Some(job) = self.jobs.get(&id) else {
            return Vec::new();
        };
        let mut deps: Vec<JobId> = job.parent.into_iter().collect();
        if job.finished_parents.is_empty() {
            return deps;
        }

        let own: HashSet<JobId> = self.tree_members(id).into_iter().collect();
        for attach in &job.finished_parents {
            if !self.jobs.contains_key(attach) {
                if !deps.contains(attach) {
                    deps.push(*attach);
                }
                continue;
            }
            for member in self.completion_set(*attach) {
                if !own.contains(&member) && !deps.contains(&member) {
                    deps.push(member);
                }
            }
        }
        deps
    }

    /// Jobs without a parent that are nobody's finished job.
    pub fn roots(&self) -> Vec<JobId> {
        self.iter()
            .filter(|j| j.parent.is_none() && j.finished_parents.is_empty())
            .map(|j| j.id())
            .collect()
    }

    /// Move the tree rooted at `root` out into its own arena.
    pub fn extract_tree(&mut self, root: JobId) -> Result<JobGraph> {
        self.require(root)?;
        let members: HashSet<JobId> = self.tree_members(root).into_iter().collect();

        let mut tree = JobGraph::new();
        let order: Vec<JobId> = self.order.clone();
        for id in order {
            if !members.contains(&id) {
                continue;
            }
            if let Some(job) = self.jobs.remove(&id) {
                tree.insert(job);
            }
        }
        self.order.retain(|id| !members.contains(id));
        Ok(tree)
    }

    /// Move every job of `other` into this arena.
    ///
    /// Fails with `DuplicateJob` (and moves nothing) when an id is already
    /// present.
    pub fn absorb(&mut self, other: JobGraph) -> Result<()> {
        if let Some(dup) = other.order.iter().find(|id| self.contains(**id)) {
            return Err(RunManagerError::DuplicateJob(*dup));
        }
        let JobGraph { mut jobs, order } = other;
        for id in order {
            if let Some(job) = jobs.remove(&id) {
                self.insert(job);
            }
        }
        Ok(())
    }
}
