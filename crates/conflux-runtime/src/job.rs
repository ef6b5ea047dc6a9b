//! Jobs: the runtime instantiation of a task on a queue.

use std::fmt;

use chrono::{DateTime, Utc};
use conflux_config::{ResolverRef, TaskSpec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Waiting,
  Success,
  Error,
}

/// Per-job lifecycle events. `Success` and `Error` are terminal and
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobEvent {
  Start,
  Success,
  Error,
}

impl JobEvent {
  pub fn is_terminal(self) -> bool {
    !matches!(self, Self::Start)
  }
}

impl fmt::Display for JobEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Start => f.write_str("start"),
      Self::Success => f.write_str("success"),
      Self::Error => f.write_str("error"),
    }
  }
}

/// A schedulable unit of work.
///
/// Values handed out by the queue are snapshots; the queue owns the live
/// state and is the only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub id: JobId,
  /// Enqueue order within the owning queue. Assigned by `Queue::enqueue`.
  pub seq: u64,
  pub task_name: String,
  pub provides: Vec<String>,
  pub requires: Vec<String>,
  pub resolver: ResolverRef,
  pub status: JobStatus,
  /// `None` until the job settles.
  pub success: Option<bool>,
  pub data: Option<serde_json::Value>,
  pub error: Option<JobError>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
  pub fn new(task_name: impl Into<String>, task: &TaskSpec) -> Self {
    Self {
      id: Uuid::new_v4(),
      seq: 0,
      task_name: task_name.into(),
      provides: task.provides.clone(),
      requires: task.requires.clone(),
      resolver: task.resolver.clone(),
      status: JobStatus::Waiting,
      success: None,
      data: None,
      error: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  pub fn is_settled(&self) -> bool {
    self.success.is_some()
  }

  /// Whether this job advertises any of `keys`.
  pub fn provides_any<S: AsRef<str>>(&self, keys: &[S]) -> bool {
    keys
      .iter()
      .any(|key| self.provides.iter().any(|p| p == key.as_ref()))
  }

  /// Task name and the full task definition this job was built from.
  pub fn properties(&self) -> serde_json::Value {
    serde_json::json!({
      "name": self.task_name,
      "provides": self.provides,
      "requires": self.requires,
      "resolver": self.resolver,
    })
  }

  pub(crate) fn succeed(&mut self, data: serde_json::Value) {
    self.status = JobStatus::Success;
    self.success = Some(true);
    self.data = Some(data);
    self.completed_at = Some(Utc::now());
  }

  pub(crate) fn fail(&mut self, error: JobError) {
    self.status = JobStatus::Error;
    self.success = Some(false);
    self.error = Some(error);
    self.completed_at = Some(Utc::now());
  }

  /// Check the shape of a job before it is scheduled.
  pub(crate) fn validate(&self) -> Result<(), String> {
    if self.task_name.trim().is_empty() {
      return Err("task name is empty".to_string());
    }
    if self.resolver.name.trim().is_empty() {
      return Err("resolver name is empty".to_string());
    }
    if let Some(key) = self.provides.iter().find(|k| k.trim().is_empty()) {
      return Err(format!("blank key '{}' in provides", key));
    }
    if let Some(key) = self.requires.iter().find(|k| k.trim().is_empty()) {
      return Err(format!("blank key '{}' in requires", key));
    }
    if !self.resolver.params.is_object() {
      return Err("resolver params must be an object".to_string());
    }
    if self.is_settled() {
      return Err("job has already settled".to_string());
    }
    Ok(())
  }
}
