//! Runtime error types.

use conflux_template::TemplateError;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::queue::QueueStatus;

/// Code attached to jobs aborted by the queue.
pub const ABORTED_CODE: &str = "JOB_ABORTED";

/// Failure recorded on a job that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
  /// The resolver returned an error.
  #[error("{message}")]
  Execution { message: String },

  /// The job was aborted before it could complete.
  #[error("{message}")]
  Aborted { code: String, message: String },

  /// A producer of one of the job's required keys failed.
  #[error("task '{task}' not run: dependency '{dependency}' failed")]
  DependencyFailed { dependency: String, task: String },
}

impl JobError {
  pub fn aborted() -> Self {
    Self::Aborted {
      code: ABORTED_CODE.to_string(),
      message: "job aborted before completion".to_string(),
    }
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self, Self::Aborted { .. })
  }
}

impl From<ResolverError> for JobError {
  fn from(e: ResolverError) -> Self {
    Self::Execution {
      message: e.to_string(),
    }
  }
}

/// Errors returned by [`crate::Queue`] operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  /// A job failed shape validation at enqueue.
  #[error("invalid job '{task}': {message}")]
  Validation { task: String, message: String },

  /// The lifecycle operation is not allowed in the current state.
  #[error("cannot {operation} queue '{queue}' while it is {status}")]
  InvalidState {
    queue: String,
    operation: &'static str,
    status: QueueStatus,
  },

  #[error("job {job_id} not found")]
  JobNotFound { job_id: JobId },

  #[error("job {job_id} has already settled")]
  AlreadySettled { job_id: JobId },
}

/// Errors raised by a resolver invocation.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
  #[error("{message}")]
  Failed { message: String },

  #[error("invalid params for resolver '{resolver}': {message}")]
  InvalidParams { resolver: String, message: String },

  #[error("resolver '{name}' is not registered")]
  UnknownResolver { name: String },

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Queue(#[from] QueueError),

  #[error(transparent)]
  Flow(Box<FlowError>),
}

impl ResolverError {
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  pub fn invalid_params(resolver: &str, message: impl Into<String>) -> Self {
    Self::InvalidParams {
      resolver: resolver.to_string(),
      message: message.into(),
    }
  }
}

impl From<FlowError> for ResolverError {
  fn from(e: FlowError) -> Self {
    Self::Flow(Box::new(e))
  }
}

/// Errors raised while compiling or running a flow.
///
/// Individual task failures never surface here; they are recorded on the
/// job and absorbed by dependency handling and aggregation.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  #[error("task '{task}' references unknown resolver '{resolver}'")]
  UnknownResolver { task: String, resolver: String },

  #[error("task '{task}' not found in flow")]
  UnknownTask { task: String },

  #[error("dependency cycle between tasks: {}", tasks.join(" -> "))]
  DependencyCycle { tasks: Vec<String> },

  #[error("nested flow depth {depth} exceeds the limit of {max}")]
  DepthExceeded { depth: usize, max: usize },

  /// The queue was torn down before reporting a drain.
  #[error("flow interrupted: {message}")]
  Interrupted { message: String },

  #[error(transparent)]
  Queue(#[from] QueueError),

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Resolver(#[from] ResolverError),
}
