//! Terminal-step precondition gate.
//!
//! Applied to a step right before it would produce the final output. The run
//! must never emit a success signal over absent or unverified work, so the
//! gate checks the whole plan's health: prior failures, required fetches,
//! declared artifacts on disk, and verification coverage.

use std::path::Path;

use crate::plan::{Capability, Plan, StepStatus};

/// How a prior failed step is treated by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSeverity {
    /// Fail the output step and the run.
    Hard,
    /// Record a risk note and let the output step proceed.
    Risk,
}

/// Policy deciding the severity of prior failures, given how many repair
/// rounds remain. Injectable so callers can tighten or relax it.
pub type PriorFailurePolicy = fn(rounds_remaining: u32) -> GateSeverity;

/// Prior failures are hard only once the repair budget is spent; while a
/// round remains the failure is recorded as a risk and repair gets its shot.
pub fn default_prior_failure_policy(rounds_remaining: u32) -> GateSeverity {
    if rounds_remaining == 0 {
        GateSeverity::Hard
    } else {
        GateSeverity::Risk
    }
}

/// Run the precondition checks for a final-output step.
///
/// Returns the recorded risk notes on success; any hard violation is an
/// `E_*`-tagged error that fails the step before it executes.
pub fn check(
    plan: &Plan,
    workspace: &Path,
    rounds_remaining: u32,
    policy: PriorFailurePolicy,
) -> Result<Vec<String>, String> {
    let mut risks = Vec::new();

    let failed: Vec<usize> = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.index)
        .collect();
    if !failed.is_empty() {
        let note = format!("steps {:?} failed before final output", failed);
        match policy(rounds_remaining) {
            GateSeverity::Hard => return Err(format!("E_PRIOR_FAILURE: {}", note)),
            GateSeverity::Risk => risks.push(note),
        }
    }

    let fetch_steps: Vec<&crate::plan::PlanStep> = plan
        .steps
        .iter()
        .filter(|s| s.allows(Capability::Fetch))
        .collect();
    if !fetch_steps.is_empty() && !fetch_steps.iter().any(|s| s.status == StepStatus::Done) {
        return Err("E_FETCH_REQUIRED: plan requires an external fetch and none succeeded".into());
    }

    for artifact in &plan.artifacts {
        if !workspace.join(artifact).exists() {
            return Err(format!("E_ARTIFACT_MISSING: {}", artifact));
        }
    }

    if !plan.artifacts.is_empty() {
        let verified = plan
            .steps
            .iter()
            .any(|s| s.allows(Capability::Verify) && s.status == StepStatus::Done);
        if !verified {
            return Err(
                "E_UNVERIFIED: artifacts are declared but no verification step completed".into(),
            );
        }
    }

    Ok(risks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanStep;

    fn plan_with(steps: Vec<PlanStep>, artifacts: Vec<String>) -> Plan {
        Plan::new("goal", steps, artifacts).unwrap()
    }

    fn done(mut step: PlanStep) -> PlanStep {
        step.status = StepStatus::Done;
        step
    }

    #[test]
    fn clean_plan_passes() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_with(
            vec![
                done(PlanStep::new("run:make build", &[Capability::RunCommand])),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec![],
        );
        let risks = check(&plan, dir.path(), 0, default_prior_failure_policy).unwrap();
        assert!(risks.is_empty());
    }

    #[test]
    fn prior_failure_is_hard_when_budget_spent() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_with(
            vec![
                PlanStep::new("run:make build", &[Capability::RunCommand]),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec![],
        );
        plan.set_step_status(0, StepStatus::Failed);

        let err = check(&plan, dir.path(), 0, default_prior_failure_policy).unwrap_err();
        assert!(err.starts_with("E_PRIOR_FAILURE"));

        // With a repair round left it is only a recorded risk.
        let risks = check(&plan, dir.path(), 1, default_prior_failure_policy).unwrap();
        assert_eq!(risks.len(), 1);
    }

    #[test]
    fn policy_is_injectable() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_with(
            vec![
                PlanStep::new("run:make build", &[Capability::RunCommand]),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec![],
        );
        plan.set_step_status(0, StepStatus::Failed);

        fn always_hard(_: u32) -> GateSeverity {
            GateSeverity::Hard
        }
        assert!(check(&plan, dir.path(), 3, always_hard).is_err());
    }

    #[test]
    fn fetch_required_but_none_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_with(
            vec![
                PlanStep::new("fetch:https://x.test data", &[Capability::Fetch]),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec![],
        );
        let err = check(&plan, dir.path(), 0, default_prior_failure_policy).unwrap_err();
        assert!(err.starts_with("E_FETCH_REQUIRED"));
    }

    #[test]
    fn missing_artifact_fails_regardless_of_policy() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_with(
            vec![
                done(PlanStep::new("write:out.csv table", &[Capability::WriteFile])),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec!["out.csv".into()],
        );
        let err = check(&plan, dir.path(), 3, default_prior_failure_policy).unwrap_err();
        assert!(err.starts_with("E_ARTIFACT_MISSING"));
        assert!(err.contains("out.csv"));
    }

    #[test]
    fn artifacts_require_a_completed_verification_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("out.csv"), "data").unwrap();

        let plan = plan_with(
            vec![
                done(PlanStep::new("write:out.csv table", &[Capability::WriteFile])),
                PlanStep::new("verify the table", &[Capability::Verify]),
                PlanStep::new("output: assemble", &[Capability::FinalOutput]),
            ],
            vec!["out.csv".into()],
        );
        let err = check(&plan, dir.path(), 0, default_prior_failure_policy).unwrap_err();
        assert!(err.starts_with("E_UNVERIFIED"));

        let mut verified = plan.clone();
        verified.set_step_status(1, StepStatus::Running);
        verified.set_step_status(1, StepStatus::Done);
        assert!(check(&verified, dir.path(), 0, default_prior_failure_policy).is_ok());
    }
}
