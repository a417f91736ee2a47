//! External collaborator seams.
//!
//! The engine never runs a step's work itself: it asks an [`ActionGenerator`]
//! for a concrete action, validates it, and hands it to a [`StepExecutor`].
//! Checkpoints go to a [`CheckpointSink`], failure analysis to a
//! [`FailureAnalyst`]. All errors on these seams are plain descriptive
//! strings, optionally carrying a leading `E_*:` code tag.

pub mod mock;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::graph::DependencyMap;
use crate::plan::{Capability, Plan, PlanStep};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Terminal status of a scheduler run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
    /// An interactive step is pending a human response.
    Waiting,
    /// An external stop signal was observed.
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Waiting => "waiting",
            RunStatus::Stopped => "stopped",
        }
    }
}

// ---------------------------------------------------------------------------
// Action / StepContext
// ---------------------------------------------------------------------------

/// The concrete action a step resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    pub capability: Capability,
    /// Free-form argument: a path, a command line, a prompt.
    pub detail: String,
}

/// Private execution context handed to exactly one worker for one attempt.
///
/// Isolated from other running steps: seeded from the most recently completed
/// dependency's output, never from shared globals.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub step: PlanStep,
    pub goal: String,
    pub workspace: PathBuf,
    pub seed_output: Option<String>,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Runs one step's resolved action. Must be safe to call concurrently for
/// independent steps.
pub trait StepExecutor: Send + Sync {
    fn execute_step(&self, ctx: &StepContext, action: &Action) -> Result<Option<String>, String>;
}

/// Produces the concrete action for a step. Retried once when the produced
/// action violates the step's capability constraint; the violation text is
/// passed back on the retry.
pub trait ActionGenerator: Send + Sync {
    fn generate_action(&self, ctx: &StepContext, violation: Option<&str>)
        -> Result<Action, String>;
}

/// Persisted snapshot of plan + run state, sufficient to resume after an
/// interruption. The dependency map is carried only as a resume cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub plan: Plan,
    pub deps: DependencyMap,
    pub step_order: usize,
    pub status: RunStatus,
}

/// Best-effort checkpoint persistence. A `false` return is logged, never
/// fatal — the in-memory plan stays the state of record.
pub trait CheckpointSink: Send + Sync {
    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> bool;
}

/// Input to a repair round's root-cause analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub error: String,
    pub recent_progress: Vec<String>,
    pub step_titles: Vec<String>,
    pub done_indices: Vec<usize>,
    pub failed_index: usize,
}

/// The winning analysis plus the fix steps to splice in. Empty `fix_steps`
/// stops the run permanently.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub winning_analysis: String,
    pub fix_steps: Vec<PlanStep>,
}

/// Root-cause analysis and fix-step generation, used only by the repair loop.
pub trait FailureAnalyst: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> AnalysisOutcome;
}

// ---------------------------------------------------------------------------
// Error-code tags
// ---------------------------------------------------------------------------

/// Extract the machine-readable `E_*` code from an error string, if present.
/// Codes lead the message and end at the first colon: `"E_DEADLOCK: ..."`.
pub fn error_code(error: &str) -> Option<&str> {
    let head = error.split(':').next()?;
    let head = head.trim();
    if head.starts_with("E_")
        && head.len() > 2
        && head[2..].chars().all(|c| c.is_ascii_uppercase() || c == '_')
    {
        Some(head)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_extraction() {
        assert_eq!(error_code("E_DEADLOCK: no step is ready"), Some("E_DEADLOCK"));
        assert_eq!(
            error_code("E_ARTIFACT_MISSING: out.csv"),
            Some("E_ARTIFACT_MISSING")
        );
        assert_eq!(error_code("plain failure text"), None);
        assert_eq!(error_code("Echo: not a code"), None);
        assert_eq!(error_code("E_: empty code"), None);
    }

    #[test]
    fn run_status_serde() {
        assert_eq!(serde_json::to_string(&RunStatus::Waiting).unwrap(), "\"waiting\"");
        let back: RunStatus = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(back, RunStatus::Stopped);
    }

    #[test]
    fn checkpoint_round_trip() {
        use crate::graph::DependencyMap;
        use crate::plan::{Capability, PlanStep};

        let plan = Plan::new(
            "goal",
            vec![PlanStep::new("run:make all", &[Capability::RunCommand])],
            vec![],
        )
        .unwrap();
        let checkpoint = Checkpoint {
            deps: DependencyMap::linear(plan.steps.len()),
            plan,
            step_order: 0,
            status: RunStatus::Done,
        };
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, RunStatus::Done);
        assert_eq!(back.plan.steps.len(), 1);
    }
}
