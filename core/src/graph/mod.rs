//! Dependency graph builder.
//!
//! Derives, for every step, the set of step indices it must wait on. The map
//! is rebuilt whenever the plan changes; it is persisted in checkpoints only
//! as a resume cache, never as ground truth.

mod hints;

pub use hints::{normalize_hints, resolve_index_base, DependencyHint, IndexBase};

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::paths;
use crate::plan::Plan;

/// Per-step prerequisite index sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyMap {
    deps: Vec<BTreeSet<usize>>,
}

impl DependencyMap {
    fn with_len(n: usize) -> Self {
        DependencyMap {
            deps: vec![BTreeSet::new(); n],
        }
    }

    /// A fully linear chain: step `i` depends on every step before it.
    pub fn linear(n: usize) -> Self {
        let deps = (0..n).map(|i| (0..i).collect()).collect();
        DependencyMap { deps }
    }

    fn add(&mut self, producer: usize, consumer: usize) {
        if producer != consumer {
            self.deps[consumer].insert(producer);
        }
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Prerequisites of step `index`.
    pub fn requires(&self, index: usize) -> &BTreeSet<usize> {
        &self.deps[index]
    }

    /// Whether every prerequisite of `index` is in `settled`.
    pub fn is_satisfied(&self, index: usize, settled: &BTreeSet<usize>) -> bool {
        self.deps[index].is_subset(settled)
    }

    /// Prerequisites of `index` that are not yet in `settled`.
    pub fn missing(&self, index: usize, settled: &BTreeSet<usize>) -> Vec<usize> {
        self.deps[index].difference(settled).copied().collect()
    }

    /// Kahn's topological count: true if repeated zero-in-degree extraction
    /// visits every node, i.e. the graph is a DAG.
    fn is_acyclic(&self) -> bool {
        let n = self.deps.len();
        let mut in_degree: Vec<usize> = self.deps.iter().map(|d| d.len()).collect();
        let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
        for (consumer, producers) in self.deps.iter().enumerate() {
            for &p in producers {
                dependents.entry(p).or_default().push(consumer);
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(node) = queue.pop() {
            visited += 1;
            if let Some(consumers) = dependents.get(&node) {
                for &c in consumers {
                    in_degree[c] -= 1;
                    if in_degree[c] == 0 {
                        queue.push(c);
                    }
                }
            }
        }
        visited == n
    }
}

/// Build the dependency map for a plan plus optional external hints.
///
/// Edge sources, in order: rebased explicit hints, implicit file-operation
/// edges, artifact-reference edges, and the final-output/feedback sink edges.
/// If the combined graph contains a cycle the whole computation is discarded
/// in favour of a fully linear chain — correctness over concurrency when the
/// hints contradict themselves.
pub fn build(plan: &Plan, hints: &[DependencyHint]) -> DependencyMap {
    let n = plan.steps.len();
    let mut map = DependencyMap::with_len(n);

    // Explicit hint edges, rebased to 0-based.
    for (producer, consumer) in normalize_hints(hints, n) {
        map.add(producer, consumer);
    }

    // Implicit file edges: a consumer of a path waits on its most recent
    // producer; later producers mask earlier ones.
    let mut last_producer: HashMap<String, usize> = HashMap::new();
    for (i, step) in plan.steps.iter().enumerate() {
        if let Some((op, path)) = paths::title_file_op(&step.title) {
            if op.consumes() {
                if let Some(&p) = last_producer.get(&path) {
                    map.add(p, i);
                }
            }
            if op.produces() {
                last_producer.insert(path, i);
            }
        }
    }

    // Artifact edges: a step mentioning a declared artifact waits on the most
    // recent earlier step that produces it.
    for artifact in &plan.artifacts {
        let mut producer: Option<usize> = None;
        for (i, step) in plan.steps.iter().enumerate() {
            let produces = matches!(
                paths::title_file_op(&step.title),
                Some((op, ref path)) if op.produces() && path == artifact
            );
            if !produces {
                if let (Some(p), true) = (producer, paths::title_references(&step.title, artifact)) {
                    map.add(p, i);
                }
            } else {
                producer = Some(i);
            }
        }
    }

    // Sink edges: the final-output step trails all work; a trailing feedback
    // step trails the output step and everything else.
    for (i, step) in plan.steps.iter().enumerate() {
        let is_sink = step.is_final_output() || (step.is_feedback() && i == n - 1);
        if is_sink {
            for j in 0..i {
                map.add(j, i);
            }
        }
    }

    if map.is_acyclic() {
        map
    } else {
        log::warn!(
            "dependency hints form a cycle over {} steps; falling back to linear ordering",
            n
        );
        DependencyMap::linear(n)
    }
}
