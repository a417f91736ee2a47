//! Scripted mock collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{
    Action, AnalysisOutcome, AnalysisRequest, ActionGenerator, Checkpoint, CheckpointSink,
    FailureAnalyst, StepContext, StepExecutor,
};
use crate::plan::Capability;

// ---------------------------------------------------------------------------
// MockExecutor
// ---------------------------------------------------------------------------

/// One observed execution event, in global arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Started(usize),
    Finished(usize),
}

/// Executor that records start/finish ordering and fails on request.
///
/// With `touch_writes` set, `write_file`/`append_file` actions create the
/// named file under the context's workspace, so artifact-gate tests can
/// exercise the filesystem check.
#[derive(Default)]
pub struct MockExecutor {
    fail_remaining: Mutex<HashMap<usize, u32>>,
    events: Mutex<Vec<ExecEvent>>,
    delay: Option<Duration>,
    touch_writes: bool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the step at `index` on every attempt.
    pub fn fail_step(self, index: usize) -> Self {
        self.fail_step_times(index, u32::MAX)
    }

    /// Fail the step at `index` for its first `times` attempts.
    pub fn fail_step_times(self, index: usize, times: u32) -> Self {
        self.fail_remaining.lock().unwrap().insert(index, times);
        self
    }

    /// Sleep inside each execution, so tests can overlap independent steps.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    pub fn touching_writes(mut self) -> Self {
        self.touch_writes = true;
        self
    }

    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Indices that started execution, in start order.
    pub fn started_order(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecEvent::Started(i) => Some(i),
                ExecEvent::Finished(_) => None,
            })
            .collect()
    }
}

impl StepExecutor for MockExecutor {
    fn execute_step(&self, ctx: &StepContext, action: &Action) -> Result<Option<String>, String> {
        let index = ctx.step.index;
        self.events.lock().unwrap().push(ExecEvent::Started(index));
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let should_fail = {
            let mut fail = self.fail_remaining.lock().unwrap();
            match fail.get_mut(&index) {
                Some(remaining) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    true
                }
                _ => false,
            }
        };

        self.events.lock().unwrap().push(ExecEvent::Finished(index));
        if should_fail {
            return Err(format!("E_MOCK: scripted failure for step {}", index));
        }

        if self.touch_writes
            && matches!(
                action.capability,
                Capability::WriteFile | Capability::AppendFile
            )
        {
            let path = ctx.workspace.join(&action.detail);
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            std::fs::write(&path, &ctx.step.title)
                .map_err(|e| format!("E_IO: cannot write {}: {}", path.display(), e))?;
        }

        Ok(Some(format!("output of step {}", index)))
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Generator that resolves each step to its first allowed capability.
///
/// Can be scripted to emit a capability-violating action for the first `n`
/// calls of a given step, to exercise the single forced re-prompt.
#[derive(Default)]
pub struct ScriptedGenerator {
    violate_first: Mutex<HashMap<usize, u32>>,
    calls: AtomicU64,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a disallowed action for the first `times` calls for step `index`.
    pub fn violating(self, index: usize, times: u32) -> Self {
        self.violate_first.lock().unwrap().insert(index, times);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A capability guaranteed to be outside the step's allowed set.
    fn disallowed_for(ctx: &StepContext) -> Capability {
        if ctx.step.allows(Capability::DeleteFile) {
            Capability::AskFeedback
        } else {
            Capability::DeleteFile
        }
    }
}

impl ActionGenerator for ScriptedGenerator {
    fn generate_action(
        &self,
        ctx: &StepContext,
        _violation: Option<&str>,
    ) -> Result<Action, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = ctx.step.index;
        let violate = {
            let mut map = self.violate_first.lock().unwrap();
            match map.get_mut(&index) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        let capability = if violate {
            Self::disallowed_for(ctx)
        } else {
            ctx.step.allowed_capabilities[0]
        };
        let detail = crate::paths::title_prefix(&ctx.step.title)
            .map(|(_, arg)| arg)
            .unwrap_or_else(|| ctx.step.title.clone());
        Ok(Action { capability, detail })
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Checkpoint sink that counts writes and keeps the most recent checkpoint.
#[derive(Default)]
pub struct MemorySink {
    writes: AtomicU64,
    last: Mutex<Option<Checkpoint>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<Checkpoint> {
        self.last.lock().unwrap().clone()
    }
}

impl CheckpointSink for MemorySink {
    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(checkpoint.clone());
        true
    }
}

/// Sink whose writes always fail; the engine must treat this as non-fatal.
pub struct FailingSink;

impl CheckpointSink for FailingSink {
    fn persist_checkpoint(&self, _checkpoint: &Checkpoint) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ScriptedAnalyst
// ---------------------------------------------------------------------------

/// Analyst that hands out pre-scripted outcomes, one per repair round.
/// Once the script is exhausted it reports no fix steps.
#[derive(Default)]
pub struct ScriptedAnalyst {
    outcomes: Mutex<VecDeque<AnalysisOutcome>>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedAnalyst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: AnalysisOutcome) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl FailureAnalyst for ScriptedAnalyst {
    fn analyze(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AnalysisOutcome {
                winning_analysis: "no further analysis available".into(),
                fix_steps: vec![],
            })
    }
}
