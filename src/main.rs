use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventide_config::WorkflowSettings;
use eventide_engine::{Event, EventData, Workflow, WorkflowConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod demos;

/// Eventide - an event-driven step dispatch engine
#[derive(Parser)]
#[command(name = "eventide")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a workflow settings file (default: ~/.eventide/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log engine activity to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a built-in demo workflow
  Demo {
    #[command(subcommand)]
    target: DemoTarget,
  },
}

#[derive(Subcommand)]
enum DemoTarget {
  /// start → double → stop; reads {"n": ...} from stdin
  Pipeline,

  /// Fan chapters out to parallel writers and assemble the results;
  /// reads {"topic": ...} from stdin
  Fanout {
    /// Number of chapters to write
    #[arg(long, default_value_t = 3)]
    tasks: usize,

    /// Task ID that should fail, e.g. chapter-2
    #[arg(long)]
    fail: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match cli.command {
    Some(Commands::Demo { target }) => {
      let settings = load_settings(cli.config.as_deref())?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run_demo(target, settings).await })?;
    }
    None => {
      println!("eventide - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(verbose: bool) {
  let level = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(format!("eventide={level},eventide_engine={level}")));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .init();
}

/// Settings from `path`, else from `~/.eventide/config.json` when present,
/// else the defaults.
fn load_settings(path: Option<&Path>) -> Result<WorkflowSettings> {
  let path = match path {
    Some(path) => path.to_path_buf(),
    None => match dirs::home_dir().map(|home| home.join(".eventide").join("config.json")) {
      Some(path) if path.exists() => path,
      _ => return Ok(WorkflowSettings::default()),
    },
  };

  let content = std::fs::read_to_string(&path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  let settings = WorkflowSettings::from_json(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))?;

  info!(path = %path.display(), "loaded settings");
  Ok(settings)
}

async fn run_demo(target: DemoTarget, settings: WorkflowSettings) -> Result<()> {
  let inputs = read_inputs_from_stdin()?;
  let mut config = WorkflowConfig::from(settings);

  let workflow: Workflow = match target {
    DemoTarget::Pipeline => {
      if config.name.is_empty() {
        config.name = "pipeline".to_string();
      }
      demos::pipeline(config)
    }
    DemoTarget::Fanout { tasks, fail } => {
      if config.name.is_empty() {
        config.name = "fanout".to_string();
      }
      demos::fanout(config, tasks, fail)
    }
  }
  .context("failed to register demo steps")?;

  eprintln!(
    "Loaded workflow: {} ({} steps)",
    workflow.name(),
    workflow.steps().len()
  );

  let handle = workflow.run(inputs).context("failed to start run")?;
  eprintln!("Run started: {}", handle.run_id());

  let mut stream = handle.stream();
  let printer = tokio::spawn(async move {
    while let Some(event) = stream.recv().await {
      eprintln!("  {}", describe(&event));
    }
  });

  let interrupt = handle.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      interrupt.cancel();
    }
  });

  let result = handle.wait().await;
  // the stream ends once the run is finalized
  let _ = printer.await;
  eprintln!("Run {}: {}", handle.run_id(), handle.status());

  let result = result.context("workflow run failed")?;
  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}

fn describe(event: &Event) -> String {
  match event {
    Event::ParallelDispatch(dispatch) => {
      format!("{} ({} tasks)", event.event_type(), dispatch.tasks.len())
    }
    Event::ParallelResult(result) => {
      let (successful, failed, duration) = result.stats();
      format!(
        "{} ({} ok, {} failed, {:?})",
        event.event_type(),
        successful,
        failed,
        duration
      )
    }
    Event::Error(failure) => format!("{}: {:#}", event.event_type(), failure.error),
    _ => match event.task_id() {
      Some(task_id) => format!("{} [{}]", event.event_type(), task_id),
      None => event.event_type().to_string(),
    },
  }
}

fn read_inputs_from_stdin() -> Result<EventData> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(EventData::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read inputs from stdin")?;

  if input.trim().is_empty() {
    return Ok(EventData::new());
  }

  match serde_json::from_str(&input).context("failed to parse inputs JSON from stdin")? {
    serde_json::Value::Object(inputs) => Ok(inputs),
    other => anyhow::bail!("inputs must be a JSON object, got: {}", other),
  }
}
