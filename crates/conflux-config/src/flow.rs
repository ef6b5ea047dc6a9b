use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::task::TaskSpec;

/// A flow definition: uniquely named tasks wired together by requires/provides.
///
/// Tasks are kept in a `BTreeMap`, so iteration (and therefore the order jobs
/// are enqueued in) is by task name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
  #[serde(default)]
  pub tasks: BTreeMap<String, TaskSpec>,
}

impl FlowSpec {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a task, replacing any task already registered under `name`.
  pub fn task(mut self, name: impl Into<String>, task: TaskSpec) -> Self {
    self.tasks.insert(name.into(), task);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Load a flow definition from a JSON or YAML file.
  pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
      .await
      .map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
      })?;
    content.parse()
  }
}

impl FromStr for FlowSpec {
  type Err = ConfigError;

  /// Parse JSON first, then fall back to YAML.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match serde_json::from_str(s) {
      Ok(spec) => Ok(spec),
      Err(json_err) => serde_yaml::from_str(s).map_err(|yaml_err| ConfigError::Parse {
        json: json_err.to_string(),
        yaml: yaml_err.to_string(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_json() {
    let spec: FlowSpec = r#"{
      "tasks": {
        "echo": {
          "provides": ["output"],
          "resolver": { "name": "Echo", "params": { "in": "test" }, "results": { "out": "output" } }
        }
      }
    }"#
    .parse()
    .unwrap();

    let task = &spec.tasks["echo"];
    assert_eq!(task.provides, vec!["output"]);
    assert_eq!(task.resolver.params, json!({ "in": "test" }));
  }

  #[test]
  fn test_parse_yaml_fallback() {
    let spec: FlowSpec = "
tasks:
  step-a:
    provides: [A]
    resolver:
      name: Echo
      params:
        in: a
  step-c:
    requires: [A]
    provides: [C]
    resolver:
      name: Noop
"
    .parse()
    .unwrap();

    assert_eq!(spec.tasks.len(), 2);
    assert_eq!(spec.tasks["step-c"].requires, vec!["A"]);
  }

  #[test]
  fn test_parse_garbage_reports_both_errors() {
    let err = "tasks: [unterminated".parse::<FlowSpec>().unwrap_err();
    match err {
      ConfigError::Parse { json, yaml } => {
        assert!(!json.is_empty());
        assert!(!yaml.is_empty());
      }
      other => panic!("unexpected error: {:?}", other),
    }
  }

  #[test]
  fn test_tasks_iterate_by_name() {
    let spec = FlowSpec::new()
      .task("zeta", TaskSpec::new("Noop"))
      .task("alpha", TaskSpec::new("Noop"));

    let names: Vec<_> = spec.tasks.keys().cloned().collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
  }
}
