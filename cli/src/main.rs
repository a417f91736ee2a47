//! Stepflow CLI — run and inspect task plans from the command line.
//!
//! ```text
//! stepflow run plan.yaml --workspace ./work
//! stepflow run plan.yaml --resume work/stepflow.checkpoint.json
//! stepflow check plan.yaml --hints hints.yaml
//! ```

mod local;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use stepflow_core::backend::Checkpoint;
use stepflow_core::scheduler::assign_roles;
use stepflow_core::{
    DependencyHint, Plan, RepairEngine, RunStatus, Scheduler, Settings, StepStatus,
};

use local::{FileSink, LocalExecutor, NoFixAnalyst, TitleActionGenerator};

#[derive(Parser)]
#[command(name = "stepflow", version, about = "Autonomous task-plan execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a plan to a terminal status.
    Run {
        /// Plan file (YAML).
        plan: PathBuf,
        /// Dependency hints file (YAML list of edges).
        #[arg(long)]
        hints: Option<PathBuf>,
        /// Directory the run's files live under.
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        /// Checkpoint file; defaults to stepflow.checkpoint.json in the workspace.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Settings file (YAML); defaults apply when absent.
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Resume from a previously written checkpoint instead of the plan's
        /// initial statuses.
        #[arg(long)]
        resume: Option<PathBuf>,
    },
    /// Validate a plan and print its roles and dependencies without running.
    Check {
        /// Plan file (YAML).
        plan: PathBuf,
        /// Dependency hints file (YAML list of edges).
        #[arg(long)]
        hints: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            plan,
            hints,
            workspace,
            checkpoint,
            settings,
            resume,
        } => run(plan, hints, workspace, checkpoint, settings, resume),
        Command::Check { plan, hints } => check(plan, hints),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("stepflow: {}", e);
            ExitCode::from(1)
        }
    }
}

fn load_plan(path: &PathBuf) -> Result<Plan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let mut plan: Plan =
        serde_yaml::from_str(&content).map_err(|e| format!("bad plan file: {}", e))?;
    plan.validate().map_err(|e| e.to_string())?;
    Ok(plan)
}

fn load_hints(path: Option<PathBuf>) -> Result<Vec<DependencyHint>, String> {
    let Some(path) = path else {
        return Ok(vec![]);
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml::from_str(&content).map_err(|e| format!("bad hints file: {}", e))
}

/// Load the plan out of a checkpoint. Steps persisted mid-flight as
/// `running` are demoted to `planned` so they get re-attempted.
fn load_resume_plan(path: &PathBuf) -> Result<Plan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let checkpoint: Checkpoint =
        serde_json::from_str(&content).map_err(|e| format!("bad checkpoint file: {}", e))?;
    let mut plan = checkpoint.plan;
    for step in &mut plan.steps {
        if step.status == StepStatus::Running {
            log::info!("step {} was mid-flight at the last checkpoint; re-attempting", step.index);
            step.status = StepStatus::Planned;
        }
    }
    plan.validate().map_err(|e| e.to_string())?;
    Ok(plan)
}

fn run(
    plan_path: PathBuf,
    hints_path: Option<PathBuf>,
    workspace: PathBuf,
    checkpoint: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    resume: Option<PathBuf>,
) -> Result<ExitCode, String> {
    let settings = match settings_path {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    let plan = match &resume {
        Some(path) => load_resume_plan(path)?,
        None => load_plan(&plan_path)?,
    };
    let hints = load_hints(hints_path)?;

    std::fs::create_dir_all(&workspace)
        .map_err(|e| format!("cannot create workspace {}: {}", workspace.display(), e))?;
    let checkpoint_path =
        checkpoint.unwrap_or_else(|| workspace.join("stepflow.checkpoint.json"));

    let scheduler = Scheduler::new(
        Arc::new(LocalExecutor),
        Arc::new(TitleActionGenerator),
        Arc::new(FileSink::new(checkpoint_path.clone())),
        &workspace,
    )
    .with_settings(settings.clone());
    let engine = RepairEngine::new(Arc::new(NoFixAnalyst), settings.max_repair_rounds);

    let outcome = engine
        .drive(&scheduler, plan, &hints, &mut |event| {
            println!("{}", event);
        })
        .map_err(|e| e.to_string())?;

    let (done, failed, total) = outcome.plan.progress_counts();
    println!(
        "run {}: {}/{} steps done, last step order {}",
        outcome.status.as_str(),
        done,
        total,
        outcome.last_order
    );
    if failed > 0 {
        println!("{} step(s) failed", failed);
    }
    if let Some(error) = &outcome.error {
        eprintln!("stepflow: {}", error);
    }
    println!("checkpoint: {}", checkpoint_path.display());

    Ok(match outcome.status {
        RunStatus::Done => ExitCode::SUCCESS,
        RunStatus::Failed => ExitCode::from(1),
        RunStatus::Waiting => ExitCode::from(2),
        RunStatus::Stopped => ExitCode::from(3),
    })
}

fn check(plan_path: PathBuf, hints_path: Option<PathBuf>) -> Result<ExitCode, String> {
    let plan = load_plan(&plan_path)?;
    let hints = load_hints(hints_path)?;
    let deps = stepflow_core::graph::build(&plan, &hints);
    let roles = assign_roles(&plan);

    println!("goal: {}", plan.goal);
    if !plan.artifacts.is_empty() {
        println!("artifacts: {}", plan.artifacts.join(", "));
    }
    for (i, step) in plan.steps.iter().enumerate() {
        let requires: Vec<String> = deps.requires(i).iter().map(|d| d.to_string()).collect();
        println!(
            "{:3}  [{:8}] {:8} {}{}",
            i,
            roles[i].as_str(),
            step.status.as_str(),
            step.brief,
            if requires.is_empty() {
                String::new()
            } else {
                format!("  (requires {})", requires.join(", "))
            }
        );
    }
    Ok(ExitCode::SUCCESS)
}
