//! Step-level types — capabilities, the status state machine, and `PlanStep`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A symbolic tag restricting what kind of action a step may resolve to.
///
/// This is the single canonical registry: step validation, action validation
/// and role inference all consult the same set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WriteFile,
    ReadFile,
    AppendFile,
    DeleteFile,
    RunCommand,
    Fetch,
    CallModel,
    Verify,
    FinalOutput,
    AskFeedback,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::WriteFile => "write_file",
            Capability::ReadFile => "read_file",
            Capability::AppendFile => "append_file",
            Capability::DeleteFile => "delete_file",
            Capability::RunCommand => "run_command",
            Capability::Fetch => "fetch",
            Capability::CallModel => "call_model",
            Capability::Verify => "verify",
            Capability::FinalOutput => "final_output",
            Capability::AskFeedback => "ask_feedback",
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Short forms match the prefixes planners put in step titles
        // ("write:out.csv ...").
        match s.to_lowercase().as_str() {
            "write_file" | "write" => Ok(Capability::WriteFile),
            "read_file" | "read" => Ok(Capability::ReadFile),
            "append_file" | "append" => Ok(Capability::AppendFile),
            "delete_file" | "delete" => Ok(Capability::DeleteFile),
            "run_command" | "run" | "shell" => Ok(Capability::RunCommand),
            "fetch" | "http" => Ok(Capability::Fetch),
            "call_model" | "model" => Ok(Capability::CallModel),
            "verify" | "test" => Ok(Capability::Verify),
            "final_output" | "output" => Ok(Capability::FinalOutput),
            "ask_feedback" | "feedback" => Ok(Capability::AskFeedback),
            _ => Err(format!("unknown capability: {}", s)),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// The lifecycle status of a plan step.
///
/// Transitions are governed by [`StepStatus::can_transition`]; anything not in
/// the table is rejected by the plan, logged, and left unchanged.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Planned,
    Running,
    Waiting,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Planned => "planned",
            StepStatus::Running => "running",
            StepStatus::Waiting => "waiting",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Whether this status satisfies a dependency on the step.
    ///
    /// `Skipped` counts: a repaired step is replaced by its fix steps, and
    /// consumers of the original must not wait on it forever.
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Skipped)
    }

    /// Whether this status may still be scheduled.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::Planned)
    }

    /// The authoritative transition table.
    ///
    /// `Failed` and `Skipped` may only leave via `Running`/`Planned`, which is
    /// the repair loop's re-activation path.
    pub fn can_transition(&self, to: StepStatus) -> bool {
        use StepStatus::*;
        match self {
            Pending => matches!(to, Planned | Running | Waiting | Done | Skipped | Failed),
            Planned => matches!(to, Running | Waiting | Done | Skipped | Failed),
            Running => matches!(to, Done | Failed | Waiting | Skipped),
            Waiting => matches!(to, Running | Done | Failed),
            Done => false,
            Failed => matches!(to, Running | Planned),
            Skipped => matches!(to, Running | Planned),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StepStatus::Pending),
            "planned" => Ok(StepStatus::Planned),
            "running" => Ok(StepStatus::Running),
            "waiting" => Ok(StepStatus::Waiting),
            "done" => Ok(StepStatus::Done),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            _ => Err(format!("unknown step status: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for StepStatus {
    /// Unknown status strings coerce to `Pending` instead of failing the
    /// whole plan load. Checkpoints written by older or foreign producers
    /// must never make a plan unloadable.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or(StepStatus::Pending))
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

/// Optional refinement of a step's capability set, used to pick out the
/// special terminal steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// The terminal "produce final output" step.
    FinalOutput,
    /// The trailing "ask for user feedback" step.
    UserFeedback,
}

// ---------------------------------------------------------------------------
// PlanStep
// ---------------------------------------------------------------------------

/// One unit of plan work.
///
/// `index` is positional, not an identity: it is reassigned whenever the plan
/// is mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub index: usize,
    pub title: String,
    /// Short display string; derived from the title when absent.
    #[serde(default)]
    pub brief: String,
    pub allowed_capabilities: Vec<Capability>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StepKind>,
    /// Present only for interactive steps; the question/choices to surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive_prompt: Option<String>,
}

impl PlanStep {
    /// Create a step with the given title and capability set, everything else
    /// defaulted.
    pub fn new(title: &str, capabilities: &[Capability]) -> Self {
        PlanStep {
            index: 0,
            title: title.to_string(),
            brief: String::new(),
            allowed_capabilities: capabilities.to_vec(),
            status: StepStatus::Pending,
            kind: None,
            interactive_prompt: None,
        }
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.allowed_capabilities.contains(&capability)
    }

    /// Whether this is the terminal "produce final output" step.
    pub fn is_final_output(&self) -> bool {
        self.kind == Some(StepKind::FinalOutput) || self.allows(Capability::FinalOutput)
    }

    /// Whether this is an "ask for user feedback" step.
    pub fn is_feedback(&self) -> bool {
        self.kind == Some(StepKind::UserFeedback) || self.allows(Capability::AskFeedback)
    }

    /// Whether this step requires a human response before it can run.
    pub fn is_interactive(&self) -> bool {
        self.interactive_prompt.is_some() || self.is_feedback()
    }

    /// Whether the repair loop may blindly re-run this step after a failure.
    pub fn is_retryable(&self) -> bool {
        !self.is_final_output() && !self.is_feedback()
    }
}
