use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conflux_config::FlowSpec;
use conflux_runtime::{FailurePolicy, FlowProducer, ResolverOverrides, RuntimeConfig};

/// Conflux - declarative, dependency-driven task flows
#[derive(Parser)]
#[command(name = "conflux")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(flatten)]
  runtime: RuntimeArgs,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Args)]
struct RuntimeArgs {
  /// Maximum number of resolvers executing at once
  #[arg(long, global = true, env = "CONFLUX_CONCURRENCY", default_value_t = 8)]
  concurrency: usize,

  /// What dependents do when a producer fails (fail-fast or proceed-empty)
  #[arg(long, global = true, env = "CONFLUX_FAILURE_POLICY", default_value_t = FailurePolicy::FailFast)]
  failure_policy: FailurePolicy,

  /// Maximum nesting of SubFlow and Loop runs
  #[arg(long, global = true, env = "CONFLUX_MAX_FLOW_DEPTH", default_value_t = 16)]
  max_flow_depth: usize,
}

impl RuntimeArgs {
  fn config(&self) -> RuntimeConfig {
    RuntimeConfig {
      concurrency: self.concurrency,
      failure_policy: self.failure_policy,
      max_flow_depth: self.max_flow_depth,
    }
    .normalized()
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Run a flow or a single task
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run an entire flow and print the requested outputs
  Flow {
    /// Path to the flow file (JSON or YAML)
    flow_file: PathBuf,

    /// Output key to collect; repeat for several
    #[arg(long = "output", short = 'o', required = true)]
    outputs: Vec<String>,

    /// Flow params as JSON (read from stdin when omitted)
    #[arg(long)]
    params: Option<String>,

    /// Opaque context handed to every task, as JSON
    #[arg(long)]
    context: Option<String>,
  },

  /// Run a single task from a flow against a supplied dataset
  Task {
    /// Path to the flow file (JSON or YAML)
    flow_file: PathBuf,

    /// The task name to execute
    #[arg(long)]
    task: String,

    /// Flow params as JSON
    #[arg(long)]
    params: Option<String>,

    /// Opaque context handed to the task, as JSON
    #[arg(long)]
    context: Option<String>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let config = cli.runtime.config();

  match cli.command {
    Some(Commands::Run { target }) => {
      let rt = tokio::runtime::Runtime::new()?;
      match target {
        RunTarget::Flow {
          flow_file,
          outputs,
          params,
          context,
        } => rt.block_on(run_flow(flow_file, outputs, params, context, config)),
        RunTarget::Task {
          flow_file,
          task,
          params,
          context,
        } => rt.block_on(run_task(flow_file, task, params, context, config)),
      }
    }
    None => {
      println!("conflux - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run_flow(
  flow_file: PathBuf,
  outputs: Vec<String>,
  params: Option<String>,
  context: Option<String>,
  config: RuntimeConfig,
) -> Result<()> {
  let spec = load_flow(&flow_file).await?;
  info!(file = %flow_file.display(), tasks = spec.tasks.len(), "flow_loaded");

  let params = match params {
    Some(raw) => parse_json("--params", &raw)?,
    None => read_payload_from_stdin()?,
  };
  let context = parse_optional("--context", context)?;

  let producer = FlowProducer::new(spec).with_config(config);
  let queue = producer.queue().clone();

  // Ctrl-C stops the queue; the run still resolves with whatever settled.
  let interrupt = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      match queue.stop() {
        Ok(report) => warn!(aborted = report.aborted.len(), "interrupted"),
        Err(e) => warn!(error = %e, "interrupt_ignored"),
      }
    }
  });

  let result = producer
    .run(params, &outputs, ResolverOverrides::new(), context)
    .await;
  interrupt.abort();
  let output = result.context("flow execution failed")?;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn run_task(
  flow_file: PathBuf,
  task: String,
  params: Option<String>,
  context: Option<String>,
  config: RuntimeConfig,
) -> Result<()> {
  let spec = load_flow(&flow_file).await?;

  // The task's requires dataset comes from stdin.
  let requires = read_payload_from_stdin()?;
  let params = parse_optional("--params", params)?;
  let context = parse_optional("--context", context)?;

  let producer = FlowProducer::new(spec).with_config(config);
  let output = producer
    .invoke_task(&task, requires, params, context)
    .await
    .with_context(|| format!("task '{}' failed", task))?;

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn load_flow(path: &Path) -> Result<FlowSpec> {
  FlowSpec::from_file(path)
    .await
    .with_context(|| format!("failed to load flow file: {}", path.display()))
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
  serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", flag))
}

fn parse_optional(flag: &str, raw: Option<String>) -> Result<Value> {
  match raw {
    Some(raw) => parse_json(flag, &raw),
    None => Ok(serde_json::json!({})),
  }
}

fn read_payload_from_stdin() -> Result<Value> {
  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}
