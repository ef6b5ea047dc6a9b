//! Flow scope, worker context, and the dependency context builder.

use std::fmt;
use std::sync::Arc;

use conflux_config::TaskSpec;
use conflux_template::{TemplateEngine, TemplateError, materialize, merge_objects};
use serde_json::{Map, Value, json};

use crate::config::RuntimeConfig;
use crate::job::Job;
use crate::queue::Queue;
use crate::registry::Registry;

/// Everything a flow run shares with its jobs and nested flows.
#[derive(Clone)]
pub struct FlowScope {
  /// Flow-run input parameters, exposed as `$flow.properties`.
  pub params: Value,
  /// Flow-run context, exposed as `$flow.context`.
  pub context: Value,
  pub registry: Registry,
  pub config: RuntimeConfig,
  /// Nesting level; 0 for a top-level flow.
  pub depth: usize,
  pub(crate) engine: Arc<TemplateEngine>,
}

impl Default for FlowScope {
  fn default() -> Self {
    Self::new(Registry::builtin(), RuntimeConfig::default())
  }
}

impl FlowScope {
  pub fn new(registry: Registry, config: RuntimeConfig) -> Self {
    Self {
      params: Value::Object(Map::new()),
      context: Value::Object(Map::new()),
      registry,
      config,
      depth: 0,
      engine: Arc::new(TemplateEngine::new()),
    }
  }

  pub fn with_params(mut self, params: Value) -> Self {
    self.params = params;
    self
  }

  pub fn with_context(mut self, context: Value) -> Self {
    self.context = context;
    self
  }

  pub fn engine(&self) -> &TemplateEngine {
    &self.engine
  }

  /// Scope for a flow nested one level below this one.
  pub(crate) fn child(&self) -> Self {
    Self {
      depth: self.depth + 1,
      ..self.clone()
    }
  }
}

impl fmt::Debug for FlowScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FlowScope")
      .field("params", &self.params)
      .field("context", &self.context)
      .field("registry", &self.registry)
      .field("config", &self.config)
      .field("depth", &self.depth)
      .finish()
  }
}

/// Handed to every resolver invocation.
#[derive(Clone)]
pub struct WorkerContext {
  /// Queue that owns the job.
  pub queue: Queue,
  /// Snapshot of the job at the time it was invoked.
  pub job: Job,
  pub scope: FlowScope,
}

impl WorkerContext {
  pub fn new(queue: Queue, job: Job, scope: FlowScope) -> Self {
    Self { queue, job, scope }
  }

  /// A context backed by a fresh, never-started queue. For invoking
  /// resolvers outside of a flow.
  pub fn detached() -> Self {
    let scope = FlowScope::default();
    let queue = Queue::new(scope.config.clone());
    let job = Job::new("detached", &TaskSpec::new("Noop"));
    Self { queue, job, scope }
  }
}

/// Assemble the dataset a job's params are materialized against:
/// `{ requires: <merged outputs>, $flow: { properties, context } }`.
///
/// Outputs merge shallowly in the given order; non-objects are skipped.
pub fn build_dependency_context(outputs: &[Value], scope: &FlowScope) -> Value {
  let mut requires = Map::new();
  for output in outputs {
    merge_objects(&mut requires, output);
  }

  json!({
    "requires": requires,
    "$flow": {
      "properties": scope.params,
      "context": scope.context,
    }
  })
}

/// Resolver input for `job` given its dependency outputs.
pub(crate) fn materialize_input(
  job: &Job,
  outputs: &[Value],
  scope: &FlowScope,
) -> Result<Value, TemplateError> {
  let dataset = build_dependency_context(outputs, scope);
  materialize(scope.engine(), &job.resolver.params, dataset)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dependency_context_shape() {
    let scope = FlowScope::default()
      .with_params(json!({ "user": "ada" }))
      .with_context(json!({ "trace": 1 }));

    let dataset = build_dependency_context(
      &[json!({ "A": "a" }), json!("ignored"), json!({ "B": "b", "A": "a2" })],
      &scope,
    );

    assert_eq!(
      dataset,
      json!({
        "requires": { "A": "a2", "B": "b" },
        "$flow": { "properties": { "user": "ada" }, "context": { "trace": 1 } }
      })
    );
  }

  #[test]
  fn test_materialize_input_without_transform() {
    let scope = FlowScope::default();
    let job = Job::new("echo", &TaskSpec::new("Echo").params(json!({ "in": "x" })));

    let input = materialize_input(&job, &[json!({ "A": 1 })], &scope).unwrap();

    assert_eq!(input["in"], "x");
    assert_eq!(input["requires"], json!({ "A": 1 }));
    assert_eq!(input["$flow"]["properties"], json!({}));
  }

  #[test]
  fn test_materialize_input_with_transform() {
    let scope = FlowScope::default().with_params(json!({ "greeting": "hi" }));
    let job = Job::new(
      "echo",
      &TaskSpec::new("Echo").params(json!({
        "transform": { "in": "{{ flow.properties.greeting }} {{ requires.name }}" }
      })),
    );

    let input = materialize_input(&job, &[json!({ "name": "bob" })], &scope).unwrap();

    assert_eq!(input, json!({ "in": "hi bob" }));
  }

  #[test]
  fn test_child_scope_increments_depth() {
    let scope = FlowScope::default().with_params(json!({ "a": 1 }));
    let child = scope.child();
    assert_eq!(child.depth, 1);
    assert_eq!(child.params, scope.params);
  }
}
