//! Progress stream events.
//!
//! Workers send these over the run's mpsc channel; the single-consumer main
//! loop forwards them to the caller's callback and feeds the checkpoint
//! throttle from the structured variant.

use std::fmt;

use crate::plan::StepStatus;

/// One event on the live progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Short human-readable line about a step.
    Note { step: usize, line: String },
    /// A step's status changed through the transition table.
    StepChanged { step: usize, status: StepStatus },
}

impl ProgressEvent {
    pub fn step(&self) -> usize {
        match self {
            ProgressEvent::Note { step, .. } => *step,
            ProgressEvent::StepChanged { step, .. } => *step,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Note { step, line } => write!(f, "[{}] {}", step, line),
            ProgressEvent::StepChanged { step, status } => {
                write!(f, "[{}] -> {}", step, status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lines() {
        let note = ProgressEvent::Note {
            step: 2,
            line: "fetching data".into(),
        };
        assert_eq!(note.to_string(), "[2] fetching data");

        let changed = ProgressEvent::StepChanged {
            step: 2,
            status: StepStatus::Done,
        };
        assert_eq!(changed.to_string(), "[2] -> done");
        assert_eq!(changed.step(), 2);
    }
}
