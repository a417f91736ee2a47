//! Stepflow engine — autonomous task-plan execution.
//!
//! The pieces, leaves first: the plan model ([`plan`]) owns the step list and
//! the status state machine; the graph builder ([`graph`]) derives per-step
//! prerequisites from hints, file operations, and artifacts; the scheduler
//! ([`scheduler`]) drives steps through role workers with deadlock detection
//! and throttled checkpoints; the repair loop ([`repair`]) splices fix steps
//! in after a failure and resumes. All external work goes through the
//! collaborator seams in [`backend`].

pub mod backend;
pub mod graph;
pub mod paths;
pub mod plan;
pub mod repair;
pub mod scheduler;
pub mod settings;

pub use backend::{
    Action, ActionGenerator, AnalysisOutcome, AnalysisRequest, Checkpoint, CheckpointSink,
    FailureAnalyst, RunStatus, StepContext, StepExecutor,
};
pub use graph::{DependencyHint, DependencyMap};
pub use plan::{Capability, Plan, PlanError, PlanStep, StepKind, StepStatus};
pub use repair::RepairEngine;
pub use scheduler::{ProgressEvent, Role, RunOutcome, Scheduler};
pub use settings::Settings;
