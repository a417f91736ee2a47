//! Concurrent step scheduler.
//!
//! One worker thread per distinct role runs a pick-execute loop against a
//! single mutex/condvar-guarded [`RunState`]. Workers report through a
//! bounded channel to the single consumer loop in [`Scheduler::run`], which
//! forwards progress to the caller, re-checks deadlock on idle polls, and
//! flushes throttled checkpoints. Step work itself happens outside the lock
//! and may block on external I/O for seconds to minutes.

mod checkpoint;
mod gate;
mod progress;
mod roles;
mod state;

pub use checkpoint::CheckpointThrottle;
pub use gate::{check as gate_check, default_prior_failure_policy, GateSeverity, PriorFailurePolicy};
pub use progress::ProgressEvent;
pub use roles::{assign as assign_roles, infer as infer_role, Role};

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::backend::{
    ActionGenerator, Checkpoint, CheckpointSink, RunStatus, StepContext, StepExecutor,
};
use crate::graph::{self, DependencyHint, DependencyMap};
use crate::plan::{Plan, PlanError, StepStatus};
use crate::settings::Settings;
use state::{RunState, StepFailure};

/// Progress notes retained for failure analysis.
const NOTE_RING: usize = 32;

/// Capacity of the worker-to-consumer progress channel.
const PROGRESS_QUEUE: usize = 256;

/// Result of one scheduler invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// The last step order reached.
    pub last_order: usize,
    /// The plan as mutated by the run.
    pub plan: Plan,
    /// The originating error for failed runs.
    pub error: Option<String>,
    /// The step the error originated at, for failed runs.
    pub failed_step: Option<usize>,
    /// The most recent progress notes, oldest first.
    pub recent_notes: Vec<String>,
}

pub struct Scheduler {
    executor: Arc<dyn StepExecutor>,
    generator: Arc<dyn ActionGenerator>,
    sink: Arc<dyn CheckpointSink>,
    settings: Settings,
    workspace: PathBuf,
    stop_flag: Arc<AtomicBool>,
    /// Serializes sink writes without blocking scheduling decisions.
    persist_gate: Mutex<()>,
    gate_policy: PriorFailurePolicy,
}

impl Scheduler {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        generator: Arc<dyn ActionGenerator>,
        sink: Arc<dyn CheckpointSink>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Scheduler {
            executor,
            generator,
            sink,
            settings: Settings::default(),
            workspace: workspace.into(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            persist_gate: Mutex::new(()),
            gate_policy: default_prior_failure_policy,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_gate_policy(mut self, policy: PriorFailurePolicy) -> Self {
        self.gate_policy = policy;
        self
    }

    /// Shared flag observed on every idle poll; setting it makes workers
    /// exit after their current unit of work and the run report `stopped`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    /// Drive the plan to a terminal status.
    ///
    /// Scheduling starts at the plan's resume point; `rounds_remaining` is
    /// how many repair rounds the caller still has, which feeds the terminal
    /// output gate's prior-failure policy.
    pub fn run(
        &self,
        mut plan: Plan,
        hints: &[DependencyHint],
        rounds_remaining: u32,
        on_event: &mut dyn FnMut(ProgressEvent),
    ) -> Result<RunOutcome, PlanError> {
        plan.validate()?;
        let start = plan.resume_point();
        let role_list = roles::assign(&plan);
        let deps = graph::build(&plan, hints);

        if start >= plan.steps.len() {
            let last_order = plan.steps.len() - 1;
            self.persist(&plan, &deps, last_order, RunStatus::Done);
            return Ok(RunOutcome {
                status: RunStatus::Done,
                last_order,
                plan,
                error: None,
                failed_step: None,
                recent_notes: vec![],
            });
        }

        let worker_roles: Vec<Role> = {
            let needed: Vec<Role> = plan
                .steps
                .iter()
                .filter(|s| s.status.is_schedulable())
                .map(|s| role_list[s.index])
                .collect();
            roles::distinct(&needed)
        };
        let goal = plan.goal.clone();
        let shared = Arc::new((
            Mutex::new(RunState::new(plan, deps, role_list, start)),
            Condvar::new(),
        ));
        let (tx, rx) = mpsc::sync_channel::<ProgressEvent>(PROGRESS_QUEUE);

        let mut handles = Vec::with_capacity(worker_roles.len());
        for &role in &worker_roles {
            let ctx = WorkerCtx {
                role,
                shared: Arc::clone(&shared),
                tx: tx.clone(),
                executor: Arc::clone(&self.executor),
                generator: Arc::clone(&self.generator),
                workspace: self.workspace.clone(),
                goal: goal.clone(),
                reprompts: self.settings.capability_reprompts,
                rounds_remaining,
                gate_policy: self.gate_policy,
            };
            let handle = thread::Builder::new()
                .name(format!("stepflow-{}", role.as_str()))
                .spawn(move || worker_loop(ctx));
            match handle {
                Ok(h) => handles.push(h),
                Err(e) => log::error!("cannot spawn {} worker: {}", role.as_str(), e),
            }
        }
        drop(tx);

        let mut throttle =
            CheckpointThrottle::new(Duration::from_millis(self.settings.checkpoint_interval_ms));
        let mut notes: VecDeque<String> = VecDeque::with_capacity(NOTE_RING);
        let poll = Duration::from_millis(self.settings.poll_ms);

        loop {
            match rx.recv_timeout(poll) {
                Ok(event) => {
                    match &event {
                        ProgressEvent::Note { line, .. } => {
                            if notes.len() == NOTE_RING {
                                notes.pop_front();
                            }
                            notes.push_back(line.clone());
                        }
                        ProgressEvent::StepChanged { status, .. } => {
                            if let Some(implied) = implied_run_status(*status) {
                                let order = shared.0.lock().unwrap().last_order;
                                throttle.mark(order, implied);
                            }
                        }
                    }
                    on_event(event);
                    self.flush_if_due(&shared, &mut throttle, false);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let (lock, cv) = &*shared;
                    {
                        let mut st = lock.lock().unwrap();
                        if self.stop_flag.load(Ordering::SeqCst) && !st.stop {
                            st.stop = true;
                            cv.notify_all();
                        }
                        if let Some(diag) = st.deadlock_diagnostic(&worker_roles) {
                            log::error!("{}", diag);
                            let blocked = st.plan.resume_point();
                            st.failure = Some(StepFailure {
                                step: blocked,
                                error: diag,
                            });
                            throttle.mark(st.last_order, RunStatus::Failed);
                            cv.notify_all();
                        }
                    }
                    self.flush_if_due(&shared, &mut throttle, false);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        let (final_plan, deps, status, last_order, error, failed_step) = {
            let mut st = shared.0.lock().unwrap();
            // Workers only exit on a finished run, but a plan whose remaining
            // steps were never schedulable spawns no workers at all; that is
            // a stall, not a success.
            if !st.finished() {
                if let Some(diag) = st.deadlock_diagnostic(&worker_roles) {
                    log::error!("{}", diag);
                    let blocked = st.plan.resume_point();
                    st.failure = Some(StepFailure {
                        step: blocked,
                        error: diag,
                    });
                }
            }
            (
                st.plan.snapshot(),
                st.deps.clone(),
                st.run_status(),
                st.last_order,
                st.failure.as_ref().map(|f| f.error.clone()),
                st.failure.as_ref().map(|f| f.step),
            )
        };
        // Shutdown flush is unconditional; throttling trades timeliness,
        // never loses the terminal state.
        self.persist(&final_plan, &deps, last_order, status);

        Ok(RunOutcome {
            status,
            last_order,
            plan: final_plan,
            error,
            failed_step,
            recent_notes: notes.into(),
        })
    }

    /// Persist a plan outside a run, bypassing the throttle. The repair loop
    /// uses this to checkpoint a freshly spliced plan before resuming.
    pub fn checkpoint_now(&self, plan: &Plan, hints: &[DependencyHint], status: RunStatus) {
        let deps = graph::build(plan, hints);
        let order = plan.resume_point().saturating_sub(1);
        self.persist(plan, &deps, order, status);
    }

    fn flush_if_due(
        &self,
        shared: &Arc<(Mutex<RunState>, Condvar)>,
        throttle: &mut CheckpointThrottle,
        force: bool,
    ) {
        if let Some(pending) = throttle.take_due(force) {
            let (plan, deps) = {
                let st = shared.0.lock().unwrap();
                (st.plan.snapshot(), st.deps.clone())
            };
            self.persist(&plan, &deps, pending.step_order, pending.status);
        }
    }

    fn persist(&self, plan: &Plan, deps: &DependencyMap, step_order: usize, status: RunStatus) {
        let checkpoint = Checkpoint {
            plan: plan.clone(),
            deps: deps.clone(),
            step_order,
            status,
        };
        let _serialized = self.persist_gate.lock().unwrap();
        if !self.sink.persist_checkpoint(&checkpoint) {
            log::warn!(
                "checkpoint write failed at step order {}; the in-memory plan remains the state of record",
                step_order
            );
        }
    }
}

/// The run-status a step-status change implies for the checkpoint record.
fn implied_run_status(status: StepStatus) -> Option<RunStatus> {
    match status {
        StepStatus::Done => Some(RunStatus::Done),
        StepStatus::Failed => Some(RunStatus::Failed),
        StepStatus::Waiting => Some(RunStatus::Waiting),
        _ => None,
    }
}

struct WorkerCtx {
    role: Role,
    shared: Arc<(Mutex<RunState>, Condvar)>,
    tx: SyncSender<ProgressEvent>,
    executor: Arc<dyn StepExecutor>,
    generator: Arc<dyn ActionGenerator>,
    workspace: PathBuf,
    goal: String,
    reprompts: u32,
    rounds_remaining: u32,
    gate_policy: PriorFailurePolicy,
}

/// Pick-execute loop for one role.
fn worker_loop(ctx: WorkerCtx) {
    let (lock, cv) = &*ctx.shared;
    loop {
        let (index, step, seed, gate_snapshot) = {
            let mut st = lock.lock().unwrap();
            loop {
                if st.finished() {
                    cv.notify_all();
                    return;
                }
                if let Some(index) = st.pick(ctx.role) {
                    if st.plan.steps[index].is_interactive() {
                        // Short-circuit straight to waiting; the run pauses
                        // until the caller re-invokes with a response.
                        let prompt = st.plan.steps[index].interactive_prompt.clone();
                        st.mark_waiting(index);
                        let _ = ctx.tx.send(ProgressEvent::StepChanged {
                            step: index,
                            status: StepStatus::Waiting,
                        });
                        if let Some(prompt) = prompt {
                            let _ = ctx.tx.send(ProgressEvent::Note {
                                step: index,
                                line: prompt,
                            });
                        }
                        cv.notify_all();
                        return;
                    }
                    st.start_step(index);
                    let _ = ctx.tx.send(ProgressEvent::StepChanged {
                        step: index,
                        status: StepStatus::Running,
                    });
                    let step = st.plan.steps[index].clone();
                    let seed = st.seed_for(index);
                    let gate_snapshot = if step.is_final_output() {
                        Some(st.plan.snapshot())
                    } else {
                        None
                    };
                    break (index, step, seed, gate_snapshot);
                }
                let (guard, _) = cv
                    .wait_timeout(st, Duration::from_millis(50))
                    .unwrap();
                st = guard;
            }
        };

        // Execution happens outside the lock; the context is privately
        // owned by this worker for exactly one attempt.
        let step_ctx = StepContext {
            step,
            goal: ctx.goal.clone(),
            workspace: ctx.workspace.clone(),
            seed_output: seed,
        };
        let result = run_one(&ctx, &step_ctx, gate_snapshot);

        let mut st = lock.lock().unwrap();
        if let Err(error) = &result {
            let _ = ctx.tx.send(ProgressEvent::Note {
                step: index,
                line: error.clone(),
            });
        }
        let status = st.finish_step(index, result);
        let _ = ctx.tx.send(ProgressEvent::StepChanged {
            step: index,
            status,
        });
        cv.notify_all();
    }
}

/// One execution attempt: generate the action, enforce the capability
/// constraint with a bounded re-prompt, apply the terminal gate, execute.
fn run_one(
    ctx: &WorkerCtx,
    step_ctx: &StepContext,
    gate_snapshot: Option<Plan>,
) -> Result<Option<String>, String> {
    let mut action = ctx.generator.generate_action(step_ctx, None)?;
    let mut reprompts = 0;
    while !step_ctx.step.allows(action.capability) {
        if reprompts >= ctx.reprompts {
            return Err(format!(
                "E_CAPABILITY: step {} resolved to {} outside its allowed set",
                step_ctx.step.index, action.capability
            ));
        }
        reprompts += 1;
        let violation = format!(
            "capability {} is not allowed for this step",
            action.capability
        );
        action = ctx.generator.generate_action(step_ctx, Some(&violation))?;
    }

    if let Some(plan) = gate_snapshot {
        let risks = gate::check(&plan, &ctx.workspace, ctx.rounds_remaining, ctx.gate_policy)?;
        for risk in risks {
            log::warn!("final output proceeding with recorded risk: {}", risk);
        }
    }

    ctx.executor.execute_step(step_ctx, &action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{FailingSink, MemorySink, MockExecutor, ScriptedGenerator};
    use crate::plan::{Capability, PlanStep};

    fn plan_from(titles: &[(&str, Capability)]) -> Plan {
        let steps = titles.iter().map(|(t, c)| PlanStep::new(t, &[*c])).collect();
        Plan::new("test goal", steps, vec![]).unwrap()
    }

    fn fast_settings() -> Settings {
        Settings {
            poll_ms: 10,
            checkpoint_interval_ms: 60_000,
            ..Settings::default()
        }
    }

    struct Rig {
        executor: Arc<MockExecutor>,
        sink: Arc<MemorySink>,
        scheduler: Scheduler,
        _dir: tempfile::TempDir,
    }

    fn rig(executor: MockExecutor, generator: ScriptedGenerator) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(executor);
        let sink = Arc::new(MemorySink::new());
        let scheduler = Scheduler::new(
            Arc::clone(&executor) as Arc<dyn StepExecutor>,
            Arc::new(generator),
            Arc::clone(&sink) as Arc<dyn CheckpointSink>,
            dir.path(),
        )
        .with_settings(fast_settings());
        Rig {
            executor,
            sink,
            scheduler,
            _dir: dir,
        }
    }

    #[test]
    fn dependencies_are_respected() {
        let rig = rig(
            MockExecutor::new().with_delay_ms(20),
            ScriptedGenerator::new(),
        );
        let plan = plan_from(&[
            ("write:a.txt produce", Capability::WriteFile),
            ("read:a.txt consume", Capability::ReadFile),
            ("run:make build", Capability::RunCommand),
        ]);

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.last_order, 2);

        let order = rig.executor.started_order();
        let pos = |i| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(0) < pos(1), "reader started before its writer: {:?}", order);
    }

    #[test]
    fn failed_step_fails_the_run_with_its_error() {
        let rig = rig(MockExecutor::new().fail_step(1), ScriptedGenerator::new());
        let plan = plan_from(&[
            ("run:make a", Capability::RunCommand),
            ("run:make b", Capability::RunCommand),
        ]);

        let mut events = Vec::new();
        let outcome = rig
            .scheduler
            .run(plan, &[], 0, &mut |e| events.push(e))
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failed_step, Some(1));
        assert!(outcome.error.unwrap().starts_with("E_MOCK"));
        // The error also went out as a progress note.
        assert!(outcome.recent_notes.iter().any(|n| n.starts_with("E_MOCK")));
        // Per-step lifecycle ordering is preserved on the stream.
        let step1: Vec<StepStatus> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StepChanged { step: 1, status } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(step1, vec![StepStatus::Running, StepStatus::Failed]);
    }

    #[test]
    fn capability_violation_gets_one_reprompt() {
        // One violation, then a valid action: the step recovers.
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new().violating(0, 1));
        let plan = plan_from(&[("write:a.txt draft", Capability::WriteFile)]);
        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
    }

    #[test]
    fn repeated_capability_violation_fails_the_step() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new().violating(0, 5));
        let plan = plan_from(&[("write:a.txt draft", Capability::WriteFile)]);
        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().starts_with("E_CAPABILITY"));
        // The executor never saw the step.
        assert!(rig.executor.started_order().is_empty());
    }

    #[test]
    fn interactive_step_pauses_the_run() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let mut plan = plan_from(&[
            ("run:make draft", Capability::RunCommand),
            ("feedback: approve the draft?", Capability::AskFeedback),
            ("run:make publish", Capability::RunCommand),
        ]);
        plan.steps[1].interactive_prompt = Some("Approve the draft?".into());
        plan.validate().unwrap();

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Waiting);
        assert_eq!(outcome.plan.steps[1].status, StepStatus::Waiting);
        // The publish step never ran.
        assert!(!rig.executor.started_order().contains(&2));
        // The prompt surfaced on the note stream.
        assert!(outcome
            .recent_notes
            .iter()
            .any(|n| n.contains("Approve the draft?")));
    }

    #[test]
    fn answered_waiting_step_resumes_to_done() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let plan = plan_from(&[
            ("run:make draft", Capability::RunCommand),
            ("feedback: approve the draft?", Capability::AskFeedback),
            ("run:make publish", Capability::RunCommand),
        ]);

        let paused = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(paused.status, RunStatus::Waiting);
        assert_eq!(paused.plan.steps[1].status, StepStatus::Waiting);

        // The response arrives out of band: the caller settles the waiting
        // step and re-invokes the scheduler on the same plan.
        let mut plan = paused.plan;
        plan.set_step_status(1, StepStatus::Done);
        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done, "error: {:?}", outcome.error);
        assert!(rig.executor.started_order().contains(&2));
        assert!(outcome.plan.steps.iter().all(|s| s.status.is_settled()));
    }

    #[test]
    fn failing_checkpoint_sink_does_not_fail_the_run() {
        // Every write is refused; the in-memory plan stays the state of
        // record and the run completes normally.
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let scheduler = Scheduler::new(
            Arc::clone(&executor) as Arc<dyn StepExecutor>,
            Arc::new(ScriptedGenerator::new()),
            Arc::new(FailingSink),
            dir.path(),
        )
        .with_settings(Settings {
            poll_ms: 10,
            // A zero interval makes every status change flush, so the sink
            // fails repeatedly during the run, not just at shutdown.
            checkpoint_interval_ms: 0,
            ..Settings::default()
        });
        let plan = plan_from(&[
            ("run:make a", Capability::RunCommand),
            ("run:make b", Capability::RunCommand),
        ]);

        let outcome = scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done, "error: {:?}", outcome.error);
        assert!(outcome.plan.steps.iter().all(|s| s.status == StepStatus::Done));
        assert_eq!(executor.started_order().len(), 2);
    }

    #[test]
    fn unsatisfiable_dependency_is_a_bounded_deadlock() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let mut plan = plan_from(&[
            ("run:make a", Capability::RunCommand),
            ("run:make b", Capability::RunCommand),
        ]);
        // A pre-existing failure that was never repaired: its dependent can
        // never become ready.
        plan.set_step_status(0, StepStatus::Failed);

        let outcome = rig
            .scheduler
            .run(plan, &[DependencyHint::Edge { from: 0, to: 1 }], 0, &mut |_| {})
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("E_DEADLOCK"), "unexpected error: {}", error);
        assert!(error.contains("step 1"));
    }

    #[test]
    fn unrepaired_failed_plan_does_not_report_done() {
        // Nothing is schedulable, so no workers are spawned at all.
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let mut plan = plan_from(&[("run:make a", Capability::RunCommand)]);
        plan.set_step_status(0, StepStatus::Failed);

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().starts_with("E_DEADLOCK"));
        assert!(rig.executor.started_order().is_empty());
    }

    #[test]
    fn stop_signal_reports_stopped() {
        let rig = rig(
            MockExecutor::new().with_delay_ms(100),
            ScriptedGenerator::new(),
        );
        let plan = plan_from(&[
            ("run:make a", Capability::RunCommand),
            ("run:make b", Capability::RunCommand),
            ("run:make c", Capability::RunCommand),
        ]);
        rig.scheduler.stop_handle().store(true, Ordering::SeqCst);

        let outcome = rig
            .scheduler
            .run(plan, &[DependencyHint::Edge { from: 0, to: 1 }], 0, &mut |_| {})
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Stopped);
    }

    #[test]
    fn missing_artifact_blocks_the_output_step() {
        // Executor does not touch the filesystem, so out.csv never appears.
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let steps = vec![
            PlanStep::new("write:out.csv build table", &[Capability::WriteFile]),
            PlanStep::new("output: assemble report", &[Capability::FinalOutput]),
        ];
        let plan = Plan::new("goal", steps, vec!["out.csv".into()]).unwrap();

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(outcome.error.unwrap().starts_with("E_ARTIFACT_MISSING"));
        // The gate fired before the output step executed.
        assert!(!rig.executor.started_order().contains(&1));
    }

    #[test]
    fn verified_artifacts_let_the_output_step_run() {
        let rig = rig(
            MockExecutor::new().touching_writes(),
            ScriptedGenerator::new(),
        );
        let steps = vec![
            PlanStep::new("write:out.csv build table", &[Capability::WriteFile]),
            PlanStep::new("verify the table", &[Capability::Verify]),
            PlanStep::new("output: assemble report", &[Capability::FinalOutput]),
        ];
        let plan = Plan::new("goal", steps, vec!["out.csv".into()]).unwrap();

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done, "error: {:?}", outcome.error);
        assert!(rig.executor.started_order().contains(&2));
    }

    #[test]
    fn checkpoints_are_throttled_but_terminal_state_is_written() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let plan = plan_from(&[
            ("run:make a", Capability::RunCommand),
            ("run:make b", Capability::RunCommand),
            ("run:make c", Capability::RunCommand),
            ("run:make d", Capability::RunCommand),
            ("run:make e", Capability::RunCommand),
            ("run:make f", Capability::RunCommand),
        ]);

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done);

        // Six done transitions under a 60s window collapse to far fewer
        // writes, and the final write reflects the finished plan.
        assert!(rig.sink.writes() < 6, "{} writes", rig.sink.writes());
        let last = rig.sink.last().unwrap();
        assert_eq!(last.status, RunStatus::Done);
        assert_eq!(last.step_order, 5);
        assert!(last.plan.steps.iter().all(|s| s.status == StepStatus::Done));
    }

    #[test]
    fn fully_settled_plan_returns_done_without_scheduling() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let mut plan = plan_from(&[("run:make a", Capability::RunCommand)]);
        plan.set_step_status(0, StepStatus::Done);

        let outcome = rig.scheduler.run(plan, &[], 0, &mut |_| {}).unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert!(rig.executor.started_order().is_empty());
        assert_eq!(rig.sink.writes(), 1);
    }

    #[test]
    fn empty_plan_is_a_structural_error() {
        let rig = rig(MockExecutor::new(), ScriptedGenerator::new());
        let plan = Plan {
            goal: "goal".into(),
            steps: vec![],
            artifacts: vec![],
        };
        assert!(rig.scheduler.run(plan, &[], 0, &mut |_| {}).is_err());
    }
}
