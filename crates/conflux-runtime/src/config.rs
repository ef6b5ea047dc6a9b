//! Runtime configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_MAX_FLOW_DEPTH: usize = 16;

/// What a job does when one of its dependencies failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
  /// Record `JobError::DependencyFailed` without invoking the resolver.
  #[default]
  FailFast,
  /// Invoke the resolver with an empty `requires` map.
  ProceedEmpty,
}

impl fmt::Display for FailurePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::FailFast => f.write_str("fail-fast"),
      Self::ProceedEmpty => f.write_str("proceed-empty"),
    }
  }
}

impl FromStr for FailurePolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "fail-fast" | "fail_fast" => Ok(Self::FailFast),
      "proceed-empty" | "proceed_empty" => Ok(Self::ProceedEmpty),
      other => Err(format!(
        "unknown failure policy '{}', expected 'fail-fast' or 'proceed-empty'",
        other
      )),
    }
  }
}

/// Configuration shared by a flow and every flow nested inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Maximum number of resolvers executing at once per queue. At least 1.
  pub concurrency: usize,
  pub failure_policy: FailurePolicy,
  /// Maximum nesting of SubFlow/Loop flows.
  pub max_flow_depth: usize,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      concurrency: DEFAULT_CONCURRENCY,
      failure_policy: FailurePolicy::default(),
      max_flow_depth: DEFAULT_MAX_FLOW_DEPTH,
    }
  }
}

impl RuntimeConfig {
  /// Clamp values to their allowed minimums.
  pub fn normalized(mut self) -> Self {
    self.concurrency = self.concurrency.max(1);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = RuntimeConfig::default();
    assert_eq!(config.concurrency, 8);
    assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    assert_eq!(config.max_flow_depth, 16);
  }

  #[test]
  fn test_partial_deserialize_uses_defaults() {
    let config: RuntimeConfig =
      serde_json::from_str(r#"{"failure_policy": "proceed-empty"}"#).unwrap();
    assert_eq!(config.failure_policy, FailurePolicy::ProceedEmpty);
    assert_eq!(config.concurrency, 8);
  }

  #[test]
  fn test_normalized_concurrency_minimum() {
    let config = RuntimeConfig {
      concurrency: 0,
      ..Default::default()
    };
    assert_eq!(config.normalized().concurrency, 1);
  }

  #[test]
  fn test_failure_policy_from_str() {
    assert_eq!("fail-fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
    assert_eq!(
      "Proceed_Empty".parse::<FailurePolicy>(),
      Ok(FailurePolicy::ProceedEmpty)
    );
    assert!("sometimes".parse::<FailurePolicy>().is_err());
  }
}
