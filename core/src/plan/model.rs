//! The `Plan` — an ordered step list plus promised artifacts.
//!
//! The plan is the single state of record during a run. The scheduler mutates
//! step statuses through the transition table; the repair loop swaps the
//! whole plan atomically via [`Plan::replace`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;
use crate::plan::step::{PlanStep, StepStatus};

/// Character budget for a step's derived brief.
pub const BRIEF_MAX: usize = 72;

/// Structural errors raised while constructing or mutating a plan.
///
/// These are programmer-error-class conditions: no partial plan is ever
/// returned, and none of them are retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("step {index} has a blank title")]
    BlankTitle { index: usize },
    #[error("step {index} ({title}) allows no capabilities")]
    NoCapabilities { index: usize, title: String },
    #[error("insert position {at} is past the end of a {len}-step plan")]
    InsertOutOfRange { at: usize, len: usize },
}

/// An ordered sequence of steps plus the artifacts the plan promises to
/// produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    /// Normalized relative paths the run must leave behind.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl Plan {
    /// Construct a validated plan. Fails closed: any structural problem
    /// returns an error and no plan.
    pub fn new(goal: &str, steps: Vec<PlanStep>, artifacts: Vec<String>) -> Result<Plan, PlanError> {
        let mut plan = Plan {
            goal: goal.to_string(),
            steps,
            artifacts,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Normalize the plan in place: derive missing briefs, cap brief length,
    /// normalize artifact paths, reassign contiguous indices.
    ///
    /// Validation is idempotent — applying it twice yields the same plan as
    /// applying it once. Structural violations (empty plan, blank titles,
    /// empty capability sets) are errors; unknown statuses were already
    /// coerced to `pending` at deserialization time.
    pub fn validate(&mut self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.title.trim().is_empty() {
                return Err(PlanError::BlankTitle { index: i });
            }
            if step.allowed_capabilities.is_empty() {
                return Err(PlanError::NoCapabilities {
                    index: i,
                    title: step.title.clone(),
                });
            }
        }
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.index = i;
            step.title = step.title.trim().to_string();
            if step.brief.trim().is_empty() {
                step.brief = step.title.clone();
            }
            if step.brief.chars().count() > BRIEF_MAX {
                step.brief = step.brief.chars().take(BRIEF_MAX).collect();
            }
        }
        for artifact in &mut self.artifacts {
            *artifact = paths::normalize(artifact);
        }
        self.artifacts.retain(|a| !a.is_empty());
        Ok(())
    }

    /// Apply a status transition through the authoritative table.
    ///
    /// A rejected transition (or out-of-range index) is a logged no-op,
    /// never a silent promotion. Returns whether the transition was applied.
    pub fn set_step_status(&mut self, index: usize, status: StepStatus) -> bool {
        let Some(step) = self.steps.get_mut(index) else {
            log::warn!("status change for out-of-range step {}", index);
            return false;
        };
        if step.status == status {
            return false;
        }
        if !step.status.can_transition(status) {
            log::warn!(
                "rejected transition {} -> {} for step {} ({})",
                step.status,
                status,
                index,
                step.brief
            );
            return false;
        }
        log::debug!("step {} ({}) {} -> {}", index, step.brief, step.status, status);
        step.status = status;
        true
    }

    /// Splice new steps in at `at`, renumbering everything after.
    pub fn insert_steps(&mut self, at: usize, steps: Vec<PlanStep>) -> Result<(), PlanError> {
        if at > self.steps.len() {
            return Err(PlanError::InsertOutOfRange {
                at,
                len: self.steps.len(),
            });
        }
        let tail = self.steps.split_off(at);
        self.steps.extend(steps);
        self.steps.extend(tail);
        self.validate()
    }

    /// Atomic whole-plan swap, used after a repair round.
    pub fn replace(&mut self, other: Plan) {
        *self = other;
    }

    /// Read-only copy for display and checkpointing.
    pub fn snapshot(&self) -> Plan {
        self.clone()
    }

    /// `(done, failed, total)` step counts for progress lines.
    pub fn progress_counts(&self) -> (usize, usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .count();
        let failed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
        (done, failed, self.steps.len())
    }

    /// Index of the first step that is neither done nor skipped — where a
    /// resumed run should start scheduling.
    pub fn resume_point(&self) -> usize {
        self.steps
            .iter()
            .position(|s| !s.status.is_settled())
            .unwrap_or(self.steps.len())
    }

    /// Indices of all done steps, in order.
    pub fn done_indices(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| s.index)
            .collect()
    }
}
