//! Local collaborators for the CLI runner.
//!
//! These back the engine's seams with the local filesystem and shell. They
//! are deliberately modest: actions come straight from step titles, commands
//! run through `sh -c`, and failure analysis proposes nothing (a failed local
//! run is final).

use std::path::PathBuf;
use std::process::Command;

use stepflow_core::backend::{
    Action, ActionGenerator, AnalysisOutcome, AnalysisRequest, Checkpoint, CheckpointSink,
    FailureAnalyst, StepContext, StepExecutor,
};
use stepflow_core::paths;
use stepflow_core::Capability;

/// Executes step actions against the workspace and the local shell.
pub struct LocalExecutor;

impl StepExecutor for LocalExecutor {
    fn execute_step(&self, ctx: &StepContext, action: &Action) -> Result<Option<String>, String> {
        let resolve = |detail: &str| ctx.workspace.join(paths::normalize(detail));
        match action.capability {
            Capability::WriteFile => {
                let path = resolve(&action.detail);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("E_IO: cannot create {}: {}", parent.display(), e))?;
                }
                let content = ctx.seed_output.as_deref().unwrap_or(&ctx.step.title);
                std::fs::write(&path, content)
                    .map_err(|e| format!("E_IO: cannot write {}: {}", path.display(), e))?;
                Ok(Some(format!("wrote {}", action.detail)))
            }
            Capability::AppendFile => {
                use std::io::Write;
                let path = resolve(&action.detail);
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| format!("E_IO: cannot open {}: {}", path.display(), e))?;
                let content = ctx.seed_output.as_deref().unwrap_or(&ctx.step.title);
                writeln!(file, "{}", content)
                    .map_err(|e| format!("E_IO: cannot append {}: {}", path.display(), e))?;
                Ok(Some(format!("appended {}", action.detail)))
            }
            Capability::ReadFile => {
                let path = resolve(&action.detail);
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| format!("E_IO: cannot read {}: {}", path.display(), e))?;
                Ok(Some(content))
            }
            Capability::DeleteFile => {
                let path = resolve(&action.detail);
                std::fs::remove_file(&path)
                    .map_err(|e| format!("E_IO: cannot delete {}: {}", path.display(), e))?;
                Ok(None)
            }
            Capability::RunCommand | Capability::Verify => run_shell(&ctx.workspace, &action.detail),
            Capability::FinalOutput => {
                // The gate has already vouched for the plan; hand back the
                // seed as the run's final output.
                Ok(ctx.seed_output.clone())
            }
            Capability::Fetch | Capability::CallModel => Err(format!(
                "E_UNSUPPORTED: {} requires an external collaborator the local runner does not carry",
                action.capability
            )),
            Capability::AskFeedback => Err(
                "E_UNSUPPORTED: feedback steps pause the run and are answered out of band".into(),
            ),
        }
    }
}

fn run_shell(workspace: &std::path::Path, command_line: &str) -> Result<Option<String>, String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .current_dir(workspace)
        .output()
        .map_err(|e| format!("E_IO: cannot run `{}`: {}", command_line, e))?;
    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "E_CMD: `{}` exited with {}: {}",
            command_line,
            output.status,
            stderr.trim()
        ))
    }
}

/// Derives each step's action from its title prefix (`write:path ...`,
/// `run:cmd ...`); falls back to the step's first allowed capability with the
/// whole title as the detail.
pub struct TitleActionGenerator;

impl ActionGenerator for TitleActionGenerator {
    fn generate_action(
        &self,
        ctx: &StepContext,
        _violation: Option<&str>,
    ) -> Result<Action, String> {
        if let Some((prefix, arg)) = paths::title_prefix(&ctx.step.title) {
            if let Ok(capability) = prefix.parse::<Capability>() {
                if ctx.step.allows(capability) {
                    // File capabilities take the single (possibly quoted)
                    // path; everything else takes the whole remainder, so a
                    // `run:make build` title keeps its arguments.
                    let detail = match capability {
                        Capability::WriteFile
                        | Capability::ReadFile
                        | Capability::AppendFile
                        | Capability::DeleteFile => arg,
                        _ => ctx
                            .step
                            .title
                            .splitn(2, ':')
                            .nth(1)
                            .unwrap_or("")
                            .trim()
                            .to_string(),
                    };
                    return Ok(Action { capability, detail });
                }
            }
        }
        Ok(Action {
            capability: ctx.step.allowed_capabilities[0],
            detail: ctx.step.title.clone(),
        })
    }
}

/// Writes checkpoints as pretty JSON, through a temp file and rename so a
/// crash mid-write never corrupts the previous checkpoint.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        FileSink { path }
    }
}

impl CheckpointSink for FileSink {
    fn persist_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        let json = match serde_json::to_string_pretty(checkpoint) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("cannot serialize checkpoint: {}", e);
                return false;
            }
        };
        let tmp = self.path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, json) {
            log::warn!("cannot write {}: {}", tmp.display(), e);
            return false;
        }
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            log::warn!("cannot move checkpoint into place: {}", e);
            return false;
        }
        true
    }
}

/// The local runner has no analysis collaborator; every failure is final.
pub struct NoFixAnalyst;

impl FailureAnalyst for NoFixAnalyst {
    fn analyze(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        log::info!(
            "no analyst configured; step {} stays failed",
            request.failed_index
        );
        AnalysisOutcome {
            winning_analysis: "local runs are not repaired".into(),
            fix_steps: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::PlanStep;

    fn ctx(dir: &std::path::Path, title: &str, caps: &[Capability]) -> StepContext {
        StepContext {
            step: PlanStep::new(title, caps),
            goal: "goal".into(),
            workspace: dir.to_path_buf(),
            seed_output: Some("seeded content".into()),
        }
    }

    #[test]
    fn write_then_read_round_trips_through_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor;

        let write = Action {
            capability: Capability::WriteFile,
            detail: "notes/a.txt".into(),
        };
        exec.execute_step(&ctx(dir.path(), "write:notes/a.txt", &[Capability::WriteFile]), &write)
            .unwrap();

        let read = Action {
            capability: Capability::ReadFile,
            detail: "notes/a.txt".into(),
        };
        let content = exec
            .execute_step(&ctx(dir.path(), "read:notes/a.txt", &[Capability::ReadFile]), &read)
            .unwrap();
        assert_eq!(content.as_deref(), Some("seeded content"));
    }

    #[test]
    fn failing_command_reports_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let action = Action {
            capability: Capability::RunCommand,
            detail: "echo oops >&2; exit 3".into(),
        };
        let err = LocalExecutor
            .execute_step(
                &ctx(dir.path(), "run:failing", &[Capability::RunCommand]),
                &action,
            )
            .unwrap_err();
        assert!(err.starts_with("E_CMD"));
        assert!(err.contains("oops"));
    }

    #[test]
    fn generator_honors_title_prefix_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let generator = TitleActionGenerator;

        let action = generator
            .generate_action(
                &ctx(dir.path(), "write:out.csv build table", &[Capability::WriteFile]),
                None,
            )
            .unwrap();
        assert_eq!(action.capability, Capability::WriteFile);
        assert_eq!(action.detail, "out.csv");

        // Commands keep their full argument list.
        let action = generator
            .generate_action(
                &ctx(dir.path(), "run:make build --jobs 2", &[Capability::RunCommand]),
                None,
            )
            .unwrap();
        assert_eq!(action.capability, Capability::RunCommand);
        assert_eq!(action.detail, "make build --jobs 2");

        // Prefix names a capability the step does not allow: fall back.
        let action = generator
            .generate_action(
                &ctx(dir.path(), "delete:out.csv cleanup", &[Capability::RunCommand]),
                None,
            )
            .unwrap();
        assert_eq!(action.capability, Capability::RunCommand);
    }

    #[test]
    fn file_sink_replaces_atomically() {
        use stepflow_core::{DependencyMap, Plan, RunStatus};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let sink = FileSink::new(path.clone());
        let plan = Plan::new(
            "goal",
            vec![PlanStep::new("run:true", &[Capability::RunCommand])],
            vec![],
        )
        .unwrap();

        for order in 0..2 {
            assert!(sink.persist_checkpoint(&Checkpoint {
                plan: plan.clone(),
                deps: DependencyMap::linear(1),
                step_order: order,
                status: RunStatus::Done,
            }));
        }
        let back: Checkpoint =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.step_order, 1);
        assert!(!path.with_extension("tmp").exists());
    }
}
