//! FlowProducer: compiles a flow definition into jobs and aggregates output.

use std::collections::HashMap;
use std::sync::Arc;

use conflux_config::{FlowSpec, TaskSpec};
use conflux_template::merge_objects;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{error, info, instrument};

use crate::config::RuntimeConfig;
use crate::context::{FlowScope, WorkerContext, materialize_input};
use crate::error::FlowError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::job::{Job, JobStatus};
use crate::queue::{Queue, QueueSnapshot, remapped_output};
use crate::registry::{Registry, ResolverOverrides};

/// Runs a [`FlowSpec`] on a private [`Queue`].
///
/// A producer runs once; [`FlowProducer::run`] consumes it.
pub struct FlowProducer {
  spec: FlowSpec,
  queue: Queue,
  scope: FlowScope,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl FlowProducer {
  /// Producer using the built-in resolvers and default configuration.
  pub fn new(spec: FlowSpec) -> Self {
    Self::with_registry(spec, Registry::builtin())
  }

  pub fn with_registry(spec: FlowSpec, registry: Registry) -> Self {
    let scope = FlowScope::new(registry, RuntimeConfig::default());
    Self::build(spec, scope, Arc::new(NoopNotifier))
  }

  /// Replace the configuration. Jobs added before this call are discarded
  /// along with the previous queue.
  pub fn with_config(mut self, config: RuntimeConfig) -> Self {
    self.scope.config = config.normalized();
    self.queue = Queue::build(None, self.scope.config.clone(), self.notifier.clone());
    self
  }

  /// Send this flow's queue events to `notifier`. Jobs added before this
  /// call are discarded along with the previous queue.
  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self.queue = Queue::build(None, self.scope.config.clone(), self.notifier.clone());
    self
  }

  /// Producer for a flow nested inside a running job. Inherits the parent's
  /// registry and configuration.
  pub(crate) fn nested(spec: FlowSpec, parent: &FlowScope) -> Result<Self, FlowError> {
    let scope = parent.child();
    if scope.depth > scope.config.max_flow_depth {
      return Err(FlowError::DepthExceeded {
        depth: scope.depth,
        max: scope.config.max_flow_depth,
      });
    }
    Ok(Self::build(spec, scope, Arc::new(NoopNotifier)))
  }

  fn build(spec: FlowSpec, scope: FlowScope, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    let queue = Queue::build(None, scope.config.clone(), notifier.clone());
    Self {
      spec,
      queue,
      scope,
      notifier,
    }
  }

  pub fn spec(&self) -> &FlowSpec {
    &self.spec
  }

  pub fn queue(&self) -> &Queue {
    &self.queue
  }

  pub fn registry(&self) -> &Registry {
    &self.scope.registry
  }

  /// Enqueue a job for `task`. Fails without enqueuing if the resolver is
  /// not registered.
  pub fn add(&self, name: &str, task: &TaskSpec) -> Result<Job, FlowError> {
    self.add_with(&self.scope.registry, name, task)
  }

  fn add_with(&self, registry: &Registry, name: &str, task: &TaskSpec) -> Result<Job, FlowError> {
    if !registry.contains(&task.resolver.name) {
      error!(task = %name, resolver = %task.resolver.name, "unknown_resolver");
      return Err(FlowError::UnknownResolver {
        task: name.to_string(),
        resolver: task.resolver.name.clone(),
      });
    }

    self
      .queue
      .enqueue(vec![Job::new(name, task)])?
      .into_iter()
      .next()
      .ok_or_else(|| FlowError::Interrupted {
        message: format!("task '{}' was not enqueued", name),
      })
  }

  /// Run every task and return the merged output of the tasks providing
  /// any of `expected`.
  ///
  /// `overrides` apply to this run only. Task failures do not fail the run;
  /// only definition errors (unknown resolvers, dependency cycles) do.
  #[instrument(
    name = "flow_run",
    skip_all,
    fields(queue = %self.queue.name(), depth = self.scope.depth)
  )]
  pub async fn run(
    self,
    params: Value,
    expected: &[String],
    overrides: ResolverOverrides,
    context: Value,
  ) -> Result<Value, FlowError> {
    let scope = FlowScope {
      params,
      context,
      registry: self.scope.registry.with_overrides(overrides),
      ..self.scope.clone()
    };

    if let Some((name, task)) = self
      .spec
      .tasks
      .iter()
      .find(|(_, task)| !scope.registry.contains(&task.resolver.name))
    {
      error!(task = %name, resolver = %task.resolver.name, "unknown_resolver");
      return Err(FlowError::UnknownResolver {
        task: name.clone(),
        resolver: task.resolver.name.clone(),
      });
    }
    check_cycles(&self.spec)?;

    info!(tasks = self.spec.tasks.len(), expected = ?expected, "flow_started");

    let registry = scope.registry.clone();
    self.queue.set_scope(scope);
    for (name, task) in &self.spec.tasks {
      self.add_with(&registry, name, task)?;
    }

    let (tx, rx) = oneshot::channel();
    self.queue.start_with(move |snapshot| {
      let _ = tx.send(snapshot);
    })?;
    let snapshot = rx.await.map_err(|_| FlowError::Interrupted {
      message: "queue released before draining".to_string(),
    })?;

    let output = aggregate(&snapshot, expected);
    info!(
      settled = snapshot.results.len(),
      keys = output.as_object().map_or(0, Map::len),
      "flow_completed"
    );
    Ok(output)
  }

  /// Build a producer for `spec` and run it with no overrides.
  pub async fn run_with(
    spec: FlowSpec,
    params: Value,
    expected: &[String],
    context: Value,
  ) -> Result<Value, FlowError> {
    Self::new(spec)
      .run(params, expected, ResolverOverrides::new(), context)
      .await
  }

  /// Run one task's resolver in isolation, using `requires` as its
  /// dependency outputs. Output is returned as the resolver produced it.
  #[instrument(name = "flow_invoke_task", skip(self, requires, params, context))]
  pub async fn invoke_task(
    &self,
    name: &str,
    requires: Value,
    params: Value,
    context: Value,
  ) -> Result<Value, FlowError> {
    let task = self
      .spec
      .tasks
      .get(name)
      .ok_or_else(|| FlowError::UnknownTask {
        task: name.to_string(),
      })?;
    let resolver =
      self
        .scope
        .registry
        .get(&task.resolver.name)
        .ok_or_else(|| FlowError::UnknownResolver {
          task: name.to_string(),
          resolver: task.resolver.name.clone(),
        })?;

    let scope = FlowScope {
      params,
      context,
      ..self.scope.clone()
    };
    let job = Job::new(name, task);
    let input = materialize_input(&job, &[requires], &scope)?;

    info!(task = %name, resolver = %task.resolver.name, "task_invoked");
    let ctx = WorkerContext::new(self.queue.clone(), job, scope);
    Ok(resolver.resolve(input, ctx).await?)
  }
}

/// Merge the outputs of successful jobs providing any `expected` key, in
/// enqueue order. Later jobs win on key collisions.
fn aggregate(snapshot: &QueueSnapshot, expected: &[String]) -> Value {
  let mut jobs: Vec<&Job> = snapshot
    .pending
    .iter()
    .chain(&snapshot.results)
    .filter(|job| job.status == JobStatus::Success && job.provides_any(expected))
    .collect();
  jobs.sort_by_key(|job| job.seq);

  let mut merged = Map::new();
  for job in jobs {
    merge_objects(&mut merged, &remapped_output(job));
  }
  Value::Object(merged)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Visiting,
  Done,
}

/// Reject flows whose requires/provides relation loops back on itself,
/// including a task requiring a key it provides.
fn check_cycles(spec: &FlowSpec) -> Result<(), FlowError> {
  let mut providers: HashMap<&str, Vec<&str>> = HashMap::new();
  for (name, task) in &spec.tasks {
    for key in &task.provides {
      providers.entry(key.as_str()).or_default().push(name.as_str());
    }
  }

  let mut marks = HashMap::new();
  let mut path = Vec::new();
  for name in spec.tasks.keys() {
    visit(name, spec, &providers, &mut marks, &mut path)
      .map_err(|tasks| FlowError::DependencyCycle { tasks })?;
  }
  Ok(())
}

fn visit<'a>(
  name: &'a str,
  spec: &'a FlowSpec,
  providers: &HashMap<&'a str, Vec<&'a str>>,
  marks: &mut HashMap<&'a str, Mark>,
  path: &mut Vec<&'a str>,
) -> Result<(), Vec<String>> {
  match marks.get(name) {
    Some(Mark::Done) => return Ok(()),
    Some(Mark::Visiting) => {
      let start = path.iter().position(|n| *n == name).unwrap_or(0);
      let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
      cycle.push(name.to_string());
      return Err(cycle);
    }
    None => {}
  }

  marks.insert(name, Mark::Visiting);
  path.push(name);
  if let Some(task) = spec.tasks.get(name) {
    for key in &task.requires {
      for producer in providers.get(key.as_str()).into_iter().flatten() {
        visit(*producer, spec, providers, marks, path)?;
      }
    }
  }
  path.pop();
  marks.insert(name, Mark::Done);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn echo(value: &str, provides: &str) -> TaskSpec {
    TaskSpec::new("Echo")
      .provides([provides])
      .params(json!({ "in": value }))
  }

  #[test]
  fn test_check_cycles_accepts_dag() {
    let spec = FlowSpec::new()
      .task("a", echo("a", "A"))
      .task("b", echo("b", "B").requires(["A"]))
      .task("c", echo("c", "C").requires(["A", "B"]));
    assert!(check_cycles(&spec).is_ok());
  }

  #[test]
  fn test_check_cycles_detects_loop() {
    let spec = FlowSpec::new()
      .task("a", echo("a", "A").requires(["B"]))
      .task("b", echo("b", "B").requires(["A"]));
    match check_cycles(&spec) {
      Err(FlowError::DependencyCycle { tasks }) => assert_eq!(tasks, vec!["a", "b", "a"]),
      other => panic!("expected cycle, got {:?}", other),
    }
  }

  #[test]
  fn test_check_cycles_detects_self_dependency() {
    let spec = FlowSpec::new().task("a", echo("a", "A").requires(["A"]));
    assert!(matches!(
      check_cycles(&spec),
      Err(FlowError::DependencyCycle { .. })
    ));
  }

  #[test]
  fn test_add_unknown_resolver_enqueues_nothing() {
    let producer = FlowProducer::new(FlowSpec::new());
    let result = producer.add("bad", &TaskSpec::new("Missing"));
    assert!(matches!(result, Err(FlowError::UnknownResolver { .. })));
    assert!(producer.queue().snapshot().pending.is_empty());
  }

  #[test]
  fn test_add_enqueues_job() {
    let producer = FlowProducer::new(FlowSpec::new());
    let job = producer.add("echo", &echo("x", "X")).unwrap();
    assert_eq!(job.task_name, "echo");
    assert_eq!(producer.queue().snapshot().pending.len(), 1);
  }

  #[test]
  fn test_aggregate_filters_and_orders() {
    let producer = FlowProducer::new(FlowSpec::new());
    let first = producer.add("first", &echo("1", "K")).unwrap();
    let second = producer.add("second", &echo("2", "K")).unwrap();
    let other = producer.add("other", &echo("3", "Other")).unwrap();

    // Settle out of enqueue order.
    producer.queue().settle(second.id, Ok(json!({ "k": "second", "b": 2 })));
    producer.queue().settle(other.id, Ok(json!({ "k": "other" })));
    producer.queue().settle(first.id, Ok(json!({ "k": "first", "a": 1 })));

    let output = aggregate(&producer.queue().snapshot(), &["K".to_string()]);
    assert_eq!(output, json!({ "k": "second", "a": 1, "b": 2 }));
  }

  #[test]
  fn test_nested_depth_limit() {
    let parent = FlowScope::new(
      Registry::builtin(),
      RuntimeConfig {
        max_flow_depth: 1,
        ..Default::default()
      },
    );
    assert!(FlowProducer::nested(FlowSpec::new(), &parent).is_ok());
    let child = parent.child();
    assert!(matches!(
      FlowProducer::nested(FlowSpec::new(), &child),
      Err(FlowError::DepthExceeded { depth: 2, max: 1 })
    ));
  }
}
