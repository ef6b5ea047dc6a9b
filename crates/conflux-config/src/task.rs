use serde::{Deserialize, Serialize};

use crate::result_map::ResultMap;

/// A named unit of declarative work inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
  /// Output keys this task yields once it succeeds.
  #[serde(default)]
  pub provides: Vec<String>,
  /// Output keys that must be produced before this task runs.
  #[serde(default)]
  pub requires: Vec<String>,
  pub resolver: ResolverRef,
}

/// Reference to a resolver in the registry, with its static parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverRef {
  /// Registry name, e.g. "Echo" or "SubFlow".
  pub name: String,

  /// Static parameters handed to the resolver. A `transform` object inside
  /// is rendered against the dependency context before invocation.
  #[serde(default = "empty_params")]
  pub params: serde_json::Value,

  /// Optional rename map for the resolver's output.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub results: Option<ResultMap>,
}

fn empty_params() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}

impl TaskSpec {
  /// Start a task definition that runs the named resolver.
  pub fn new(resolver: impl Into<String>) -> Self {
    Self {
      provides: Vec::new(),
      requires: Vec::new(),
      resolver: ResolverRef::new(resolver),
    }
  }

  pub fn provides<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.provides = keys.into_iter().map(Into::into).collect();
    self
  }

  pub fn requires<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.requires = keys.into_iter().map(Into::into).collect();
    self
  }

  pub fn params(mut self, params: serde_json::Value) -> Self {
    self.resolver.params = params;
    self
  }

  pub fn results(mut self, results: ResultMap) -> Self {
    self.resolver.results = Some(results);
    self
  }
}

impl ResolverRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      params: empty_params(),
      results: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ResultKey;
  use serde_json::json;

  #[test]
  fn test_defaults_when_fields_missing() {
    let task: TaskSpec = serde_json::from_value(json!({
      "resolver": { "name": "Noop" }
    }))
    .unwrap();

    assert!(task.provides.is_empty());
    assert!(task.requires.is_empty());
    assert_eq!(task.resolver.params, json!({}));
    assert!(task.resolver.results.is_none());
  }

  #[test]
  fn test_builder_matches_deserialized() {
    let built = TaskSpec::new("Echo")
      .provides(["output"])
      .params(json!({ "in": "test" }))
      .results(ResultMap::from([("out".to_string(), ResultKey::from("output"))]));

    let parsed: TaskSpec = serde_json::from_value(json!({
      "provides": ["output"],
      "resolver": { "name": "Echo", "params": { "in": "test" }, "results": { "out": "output" } }
    }))
    .unwrap();

    assert_eq!(built, parsed);
  }

  #[test]
  fn test_results_omitted_when_serializing() {
    let value = serde_json::to_value(TaskSpec::new("Noop")).unwrap();
    assert!(value["resolver"].get("results").is_none());
  }
}
