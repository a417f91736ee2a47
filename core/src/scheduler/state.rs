//! Shared run state, guarded by the scheduler's single mutex.
//!
//! Everything workers coordinate through lives here: the plan itself, the
//! `running`/`completed` index sets, the interactive barrier slot, and the
//! terminal flags. Step execution contexts are built from this state under
//! the lock, then privately owned by one worker outside it.

use std::collections::{BTreeSet, HashMap};

use crate::backend::RunStatus;
use crate::graph::DependencyMap;
use crate::plan::{Plan, StepStatus};
use crate::scheduler::roles::Role;

/// The first captured step failure; later failures do not overwrite it.
#[derive(Debug, Clone)]
pub(crate) struct StepFailure {
    pub step: usize,
    pub error: String,
}

#[derive(Debug)]
pub(crate) struct RunState {
    pub plan: Plan,
    pub deps: DependencyMap,
    pub roles: Vec<Role>,
    /// First index eligible for scheduling; everything before it was settled
    /// by an earlier run.
    pub start: usize,
    pub completed: BTreeSet<usize>,
    pub running: BTreeSet<usize>,
    /// At most one interactive step waiting to run exclusively.
    pub barrier: Option<usize>,
    pub outputs: HashMap<usize, String>,
    /// Completion order, used to seed a step's context from its most
    /// recently completed dependency.
    completion_seq: Vec<usize>,
    pub failure: Option<StepFailure>,
    pub waiting: Option<usize>,
    pub stop: bool,
    pub last_order: usize,
}

impl RunState {
    pub fn new(plan: Plan, deps: DependencyMap, roles: Vec<Role>, start: usize) -> Self {
        let completed: BTreeSet<usize> = plan
            .steps
            .iter()
            .filter(|s| s.status.is_settled())
            .map(|s| s.index)
            .collect();
        let completion_seq: Vec<usize> = completed.iter().copied().collect();
        let last_order = completed.iter().max().copied().unwrap_or(0);
        // A plan resumed with an unanswered interactive step stays paused
        // until the caller settles it.
        let waiting = plan
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Waiting);
        RunState {
            plan,
            deps,
            roles,
            start,
            completed,
            completion_seq,
            running: BTreeSet::new(),
            barrier: None,
            outputs: HashMap::new(),
            failure: None,
            waiting,
            stop: false,
            last_order,
        }
    }

    /// Whether the run is over and workers should exit.
    pub fn finished(&self) -> bool {
        self.stop
            || self.failure.is_some()
            || self.waiting.is_some()
            || self.plan.steps.iter().all(|s| s.status.is_settled())
    }

    pub fn run_status(&self) -> RunStatus {
        if self.stop {
            RunStatus::Stopped
        } else if self.failure.is_some() {
            RunStatus::Failed
        } else if self.waiting.is_some() {
            RunStatus::Waiting
        } else {
            RunStatus::Done
        }
    }

    fn ready(&self, index: usize) -> bool {
        index >= self.start
            && self.plan.steps[index].status.is_schedulable()
            && !self.running.contains(&index)
            && !self.completed.contains(&index)
            && self.deps.is_satisfied(index, &self.completed)
    }

    /// Pick the next step for a worker of `role`.
    ///
    /// A ready interactive step claims the barrier slot first; once the
    /// barrier is set nothing may start until running drains, and then only
    /// the barrier step's own role may take it.
    pub fn pick(&mut self, role: Role) -> Option<usize> {
        if self.barrier.is_none() {
            self.barrier = (self.start..self.plan.steps.len())
                .find(|&i| self.plan.steps[i].is_interactive() && self.ready(i));
        }
        if let Some(b) = self.barrier {
            if !self.running.is_empty() {
                return None;
            }
            if self.roles[b] == role && self.ready(b) {
                return Some(b);
            }
            return None;
        }
        (self.start..self.plan.steps.len()).find(|&i| self.roles[i] == role && self.ready(i))
    }

    /// Move a picked step into `running`.
    pub fn start_step(&mut self, index: usize) {
        self.running.insert(index);
        self.plan.set_step_status(index, StepStatus::Running);
    }

    /// Short-circuit a picked interactive step to `waiting`; the whole run
    /// pauses here.
    pub fn mark_waiting(&mut self, index: usize) {
        self.running.remove(&index);
        self.plan.set_step_status(index, StepStatus::Waiting);
        self.waiting = Some(index);
        self.last_order = self.last_order.max(index);
    }

    /// Record a step's execution result and return the status it reached.
    pub fn finish_step(
        &mut self,
        index: usize,
        result: Result<Option<String>, String>,
    ) -> StepStatus {
        self.running.remove(&index);
        match result {
            Ok(output) => {
                self.plan.set_step_status(index, StepStatus::Done);
                self.completed.insert(index);
                self.completion_seq.push(index);
                if let Some(out) = output {
                    self.outputs.insert(index, out);
                }
                self.last_order = self.last_order.max(index);
                StepStatus::Done
            }
            Err(error) => {
                self.plan.set_step_status(index, StepStatus::Failed);
                if self.failure.is_none() {
                    self.failure = Some(StepFailure { step: index, error });
                }
                StepStatus::Failed
            }
        }
    }

    /// The output of `index`'s most recently completed dependency, if any.
    pub fn seed_for(&self, index: usize) -> Option<String> {
        let deps = self.deps.requires(index);
        self.completion_seq
            .iter()
            .rev()
            .find(|i| deps.contains(i))
            .and_then(|i| self.outputs.get(i))
            .cloned()
    }

    /// Whether any remaining step could be picked by some existing worker.
    fn has_pickable(&self, worker_roles: &[Role]) -> bool {
        if let Some(b) = self.barrier {
            return self.ready(b) && worker_roles.contains(&self.roles[b]);
        }
        (self.start..self.plan.steps.len())
            .any(|i| self.ready(i) && worker_roles.contains(&self.roles[i]))
    }

    /// Idle-poll deadlock check. With work remaining, nothing running, and
    /// nothing pickable, build the diagnostic payload: each blocked step,
    /// its missing prerequisites, and which of those lie before the
    /// scheduled window.
    pub fn deadlock_diagnostic(&self, worker_roles: &[Role]) -> Option<String> {
        if self.finished() || !self.running.is_empty() || self.has_pickable(worker_roles) {
            return None;
        }
        let mut blocked = Vec::new();
        for (i, step) in self.plan.steps.iter().enumerate() {
            if step.status.is_settled() || self.completed.contains(&i) {
                continue;
            }
            let missing = self.deps.missing(i, &self.completed);
            let outside: Vec<usize> = missing.iter().copied().filter(|&m| m < self.start).collect();
            let mut line = format!("step {} ({}) waiting on {:?}", i, step.brief, missing);
            if !outside.is_empty() {
                line.push_str(&format!(", of which {:?} precede the scheduled window", outside));
            }
            blocked.push(line);
        }
        Some(format!(
            "E_DEADLOCK: no step is runnable and none are running; {}",
            blocked.join("; ")
        ))
    }
}
