//! Plan data model — steps, the status state machine, and the plan itself.

mod model;
mod step;

pub use model::{Plan, PlanError, BRIEF_MAX};
pub use step::{Capability, PlanStep, StepKind, StepStatus};
