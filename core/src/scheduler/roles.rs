//! Worker roles — one worker thread is spawned per distinct role in the plan.

use serde::{Deserialize, Serialize};

use crate::plan::{Capability, Plan, PlanStep};

/// The executor persona a step is assigned to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs commands and fetches external data.
    Builder,
    /// Writes and transforms documents, calls models, assembles output.
    Scribe,
    /// Tests and verification.
    Verifier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Builder => "builder",
            Role::Scribe => "scribe",
            Role::Verifier => "verifier",
        }
    }
}

/// Infer a step's role from its capability set and title.
pub fn infer(step: &PlanStep) -> Role {
    let title = step.title.to_lowercase();
    if step.allows(Capability::Verify) || title.contains("verify") || title.contains("test") {
        return Role::Verifier;
    }
    if step.allows(Capability::RunCommand) || step.allows(Capability::Fetch) {
        return Role::Builder;
    }
    Role::Scribe
}

/// Per-step role assignment for the whole plan.
pub fn assign(plan: &Plan) -> Vec<Role> {
    plan.steps.iter().map(infer).collect()
}

/// Distinct roles in first-appearance order.
pub fn distinct(roles: &[Role]) -> Vec<Role> {
    let mut out = Vec::new();
    for role in roles {
        if !out.contains(role) {
            out.push(*role);
        }
    }
    out
}
