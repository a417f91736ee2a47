//! Bounded repair-and-resume loop.
//!
//! Wraps the scheduler: when a run fails, the failure is handed to the
//! injected analyst, the proposed fix steps are spliced in right after the
//! failed step, the failed step is retired to `skipped` (kept, never deleted),
//! and the scheduler resumes from the first unfinished step. The loop is
//! strictly serialized with the scheduler — repair only ever touches the plan
//! while no run is in flight.

use std::sync::Arc;

use crate::backend::{error_code, AnalysisRequest, FailureAnalyst, RunStatus};
use crate::graph::DependencyHint;
use crate::plan::{Plan, PlanError, PlanStep, StepStatus};
use crate::scheduler::{ProgressEvent, RunOutcome, Scheduler};

/// At most this many generated fix steps survive per round, before the
/// optional retry of the original step is appended.
const MAX_GENERATED_FIXES: usize = 2;

pub struct RepairEngine {
    analyst: Arc<dyn FailureAnalyst>,
    max_rounds: u32,
}

impl RepairEngine {
    pub fn new(analyst: Arc<dyn FailureAnalyst>, max_rounds: u32) -> Self {
        RepairEngine { analyst, max_rounds }
    }

    /// Run the plan to a terminal status, repairing failures until the round
    /// budget is spent.
    ///
    /// Deadlocks are a scheduler-integrity failure and are never repaired.
    /// A round that produces zero fix steps ends the run permanently.
    pub fn drive(
        &self,
        scheduler: &Scheduler,
        plan: Plan,
        hints: &[DependencyHint],
        on_event: &mut dyn FnMut(ProgressEvent),
    ) -> Result<RunOutcome, PlanError> {
        let mut rounds_left = self.max_rounds;
        let mut outcome = scheduler.run(plan, hints, rounds_left, on_event)?;

        while outcome.status == RunStatus::Failed && rounds_left > 0 {
            let error = outcome.error.clone().unwrap_or_default();
            if error_code(&error) == Some("E_DEADLOCK") {
                break;
            }
            let Some(failed_index) = outcome.failed_step else {
                break;
            };
            rounds_left -= 1;

            let request = AnalysisRequest {
                error,
                recent_progress: outcome.recent_notes.clone(),
                step_titles: outcome.plan.steps.iter().map(|s| s.title.clone()).collect(),
                done_indices: outcome.plan.done_indices(),
                failed_index,
            };
            let analysis = self.analyst.analyze(&request);
            if analysis.fix_steps.is_empty() {
                log::warn!(
                    "repair produced no fix steps for step {}; run is permanently failed",
                    failed_index
                );
                break;
            }

            let mut fixes: Vec<PlanStep> = analysis
                .fix_steps
                .into_iter()
                .take(MAX_GENERATED_FIXES)
                .collect();
            let failed_step = outcome.plan.steps[failed_index].clone();
            if failed_step.is_retryable() {
                // Blind re-run is allowed for ordinary steps only; terminal
                // output and feedback steps get fixes, never a retry.
                let mut retry = failed_step;
                retry.status = StepStatus::Pending;
                fixes.push(retry);
            }

            log::info!(
                "repair round {}/{}: {} ({} fix steps)",
                self.max_rounds - rounds_left,
                self.max_rounds,
                analysis.winning_analysis,
                fixes.len()
            );
            on_event(ProgressEvent::Note {
                step: failed_index,
                line: format!("repair: {}", analysis.winning_analysis),
            });

            let mut plan = outcome.plan;
            // Retire the failed step through the table's re-activation path;
            // the record stays in the plan as an audit trail.
            plan.set_step_status(failed_index, StepStatus::Planned);
            plan.set_step_status(failed_index, StepStatus::Skipped);
            // Any other failed step is re-activated rather than left to
            // starve its dependents. The status table has no edge back to
            // `pending`, so re-activation lands on `planned`; the scheduler
            // treats the two identically.
            for i in 0..plan.steps.len() {
                if plan.steps[i].status == StepStatus::Failed {
                    plan.set_step_status(i, StepStatus::Planned);
                }
            }
            plan.insert_steps(failed_index + 1, fixes)?;
            // The spliced plan is checkpointed before resuming, so a crash
            // here resumes with the fixes in place.
            scheduler.checkpoint_now(&plan, hints, RunStatus::Failed);

            outcome = scheduler.run(plan, hints, rounds_left, on_event)?;
        }

        if outcome.status == RunStatus::Failed && rounds_left == 0 {
            log::warn!("repair budget of {} rounds exhausted", self.max_rounds);
        }
        Ok(outcome)
    }
}
