//! servicerun - command-line entry point
//!
//! Loads a procedure definition, merges saved progress from the configured
//! store, applies one command, and prints the result as JSON on stdout.
//! Logs go to stderr.

use anyhow::{anyhow, bail, Context};
use serde_json::json;
use servicerun::{
    config::Config,
    layout::LayoutMode,
    procedure::{Position, Procedure},
    run::ServiceRun,
    store::{create_snapshot_store, SnapshotStore},
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: servicerun <procedure-file> <command>

commands:
  show                      merged steps, edges and activity
  start                     open the execution gate
  toggle <step> <task>      flip a task's completion
  layout [sequence|centered]
                            recompute positions and edges
  move <step> <x> <y>       place a step explicitly
  reset                     clear all progress
  progress                  completion counters

environment:
  SERVICERUN_TECHNICIAN_A / _B    technician ids bound to roles A and B
  SERVICERUN_TECHNICIANS          JSON or YAML roster; needed for initials";

#[derive(Debug, PartialEq)]
enum Command {
    Show,
    Start,
    Toggle { step: String, task: String },
    Layout(Option<LayoutMode>),
    Move { step: String, x: i64, y: i64 },
    Reset,
    Progress,
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let command = match args.as_slice() {
        ["show"] => Command::Show,
        ["start"] => Command::Start,
        ["toggle", step, task] => Command::Toggle {
            step: step.to_string(),
            task: task.to_string(),
        },
        ["layout"] => Command::Layout(None),
        ["layout", mode] => Command::Layout(Some(
            LayoutMode::parse(mode).ok_or_else(|| anyhow!("unknown layout mode {:?}", mode))?,
        )),
        ["move", step, x, y] => Command::Move {
            step: step.to_string(),
            x: x.parse().with_context(|| format!("invalid x coordinate {:?}", x))?,
            y: y.parse().with_context(|| format!("invalid y coordinate {:?}", y))?,
        },
        ["reset"] => Command::Reset,
        ["progress"] => Command::Progress,
        _ => bail!(USAGE),
    };
    Ok(command)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "servicerun=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((path, rest)) = args.split_first() else {
        bail!(USAGE);
    };
    let command = parse_command(rest)?;

    let config = Config::from_env()?;
    info!(
        store = %config.store_type,
        data_dir = %config.data_dir.display(),
        operator = %config.operator,
        "Loaded configuration"
    );

    let procedure = Procedure::from_path(Path::new(path))?;
    let store: Arc<dyn SnapshotStore> = Arc::from(
        create_snapshot_store(config.store_type, config.data_dir.clone(), &config.operator)
            .await?,
    );
    let directory = config.directory()?;
    if directory.is_empty() {
        info!("No technician roster configured; completions will carry ids without initials");
    }
    let session = config.session(Arc::new(directory));
    let mut run = ServiceRun::open(procedure, store, session, config.run_options()).await?;

    let output = match command {
        Command::Show => json!({
            "procedureId": run.procedure().id,
            "name": run.procedure().name,
            "decision": run.merge_decision(),
            "started": run.is_started(),
            "activeStepIds": run.active_steps(),
            "finished": run.is_finished(),
            "steps": run.steps(),
            "edges": run.edges(),
        }),
        Command::Start => {
            run.start().await?;
            json!({ "started": true, "activeStepIds": run.active_steps() })
        }
        Command::Toggle { step, task } => {
            let report = run.toggle_task(&step, &task).await?;
            json!({
                "report": report,
                "activeStepIds": run.active_steps(),
                "finished": run.is_finished(),
            })
        }
        Command::Layout(mode) => {
            let mode = mode.unwrap_or(config.layout_mode);
            let computed = run.relayout(mode).await?;
            json!({ "mode": mode, "layout": computed })
        }
        Command::Move { step, x, y } => {
            run.move_step(&step, Position::new(x, y)).await?;
            json!({ "stepId": step, "position": Position::new(x, y) })
        }
        Command::Reset => {
            run.reset().await?;
            json!({ "reset": true })
        }
        Command::Progress => serde_json::to_value(run.progress())?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
