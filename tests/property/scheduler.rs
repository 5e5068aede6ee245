// tests/property/scheduler.rs

#[path = "../common/mod.rs"]
mod common;
use crate::common::{drive, scheduler_with};

use std::collections::HashSet;

use proptest::prelude::*;
use runmanager::dag::JobGraph;
use runmanager::fs::mock::MockFileSystem;
use runmanager::job::{Files, RunState, Tools};
use runmanager::types::{JobId, TreeStatus};
use runmanager_test_utils::builders::GraphBuilder;

/// How job `i` (i >= 1) hangs below an earlier job.
#[derive(Debug, Clone)]
struct Attach {
    parent: usize,
    as_finished: bool,
    /// Extra earlier job the finished job also joins on.
    join: Option<usize>,
    null: bool,
}

fn attach_strategy(max_jobs: usize) -> impl Strategy<Value = Vec<Attach>> {
    proptest::collection::vec(
        (any::<usize>(), any::<bool>(), proptest::option::of(any::<usize>()), any::<bool>()),
        0..max_jobs,
    )
    .prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (parent, as_finished, join, null))| Attach {
                // Job i + 1 attaches to one of 0..=i, which keeps the graph acyclic.
                parent: parent % (i + 1),
                as_finished,
                join: join.map(|j| j % (i + 1)),
                null,
            })
            .collect()
    })
}

fn name(i: usize) -> String {
    format!("job_{i}")
}

/// Build the tree rooted at `job_0`.
///
/// Job ids are recorded in creation order.
fn build(attach: &[Attach]) -> (JobGraph, Vec<JobId>) {
    let mut b = GraphBuilder::new().null(&name(0));
    let mut finished_of: Vec<Option<usize>> = vec![None];

    for (k, a) in attach.iter().enumerate() {
        let i = k + 1;
        b = if a.null {
            b.null(&name(i))
        } else {
            b.tool(&name(i), "sim", Files::new(), Tools::new())
        };
        finished_of.push(None);

        if a.as_finished && finished_of[a.parent].is_none() {
            b = b.finished(&name(a.parent), &name(i));
            finished_of[a.parent] = Some(i);
            if let Some(j) = a.join.filter(|j| *j != a.parent && finished_of[*j].is_none()) {
                b = b.finished(&name(j), &name(i));
                finished_of[j] = Some(i);
            }
        } else {
            b = b.child(&name(a.parent), &name(i));
        }
    }

    let (graph, names) = b.build();
    let ids = (0..=attach.len()).map(|i| names[&name(i)]).collect();
    (graph, ids)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_trees_settle_and_respect_dependency_order(
        attach in attach_strategy(12),
        failing in proptest::collection::vec(0..13usize, 0..3),
        max_workers in 1..4usize,
    ) {
        let fs = MockFileSystem::new();
        let mut scheduler = scheduler_with(max_workers, &fs);
        let (graph, ids) = build(&attach);
        let root = ids[0];
        let failing: HashSet<JobId> = failing
            .into_iter()
            .filter_map(|i| ids.get(i).copied())
            .collect();

        let step = scheduler.enqueue(graph, root, false).unwrap();
        prop_assert!(step.dispatched.len() <= max_workers);
        drive(&mut scheduler, step, &failing);

        // Everything settled and nothing is left in flight.
        prop_assert!(scheduler.tree_settled(root));
        prop_assert_eq!(scheduler.in_flight(), 0);

        for id in &ids {
            let job = scheduler.job(*id).unwrap();
            prop_assert!(job.run_state().is_terminal());

            let deps = scheduler.graph().dependencies(*id);
            if job.run_state() == RunState::Succeeded {
                for dep in &deps {
                    let upstream = scheduler.job(*dep).unwrap();
                    prop_assert_eq!(upstream.run_state(), RunState::Succeeded);
                    prop_assert!(
                        upstream.ran_before(job),
                        "dependency {} did not run before {}", dep, id
                    );
                }
            }
            if job.run_state() == RunState::Failed && job.last_run().is_none() {
                // Blocked: some dependency failed.
                let blocked = deps
                    .iter()
                    .any(|d| scheduler.job(*d).unwrap().run_state() == RunState::Failed);
                prop_assert!(blocked);
            }
        }

        let status = scheduler.tree_status(root).unwrap();
        let ran_failing = failing.iter().any(|id| {
            scheduler.job(*id).unwrap().last_run().is_some()
                && scheduler.job(*id).unwrap().run_state() == RunState::Failed
        });
        if ran_failing {
            prop_assert_eq!(status, TreeStatus::Failed);
            prop_assert_eq!(scheduler.tree_last_run(root), None);
        }
        if status == TreeStatus::Finished {
            let newest = ids
                .iter()
                .filter_map(|id| scheduler.job(*id).unwrap().last_run())
                .max();
            prop_assert_eq!(scheduler.tree_last_run(root), newest);
        }

        // Without changes a second pass dispatches nothing and keeps the
        // status.
        if status == TreeStatus::Finished {
            let again = scheduler.requeue(root, false).unwrap();
            prop_assert!(again.dispatched.is_empty());
            prop_assert_eq!(scheduler.tree_status(root), Some(TreeStatus::Finished));
        }
    }
}
