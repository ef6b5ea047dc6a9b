//! Queue driver and per-job execution.
//!
//! One driver task runs per `start`. It takes a concurrency permit, moves the
//! next pending job in flight, and spawns its execution. A job waiting on
//! producers gives its permit back until they settle, so any concurrency
//! limit of at least one makes progress.

use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, instrument, warn};

use crate::config::FailurePolicy;
use crate::context::{FlowScope, WorkerContext, materialize_input};
use crate::error::{JobError, ResolverError};
use crate::job::Job;
use crate::queue::{Dependencies, Queue, QueueStatus};

enum Step {
  Dispatch,
  Wait,
  Suspend,
  Drain,
}

pub(crate) async fn drive(queue: Queue, generation: u64) {
  loop {
    let step = {
      let state = queue.lock();
      if state.generation != generation {
        return;
      }
      match state.status {
        QueueStatus::Paused => Step::Suspend,
        QueueStatus::Stopped => Step::Drain,
        QueueStatus::Running if !state.pending.is_empty() => Step::Dispatch,
        QueueStatus::Running if state.in_flight.is_empty() => Step::Drain,
        QueueStatus::Running => Step::Wait,
      }
    };

    match step {
      Step::Suspend => {
        debug!(queue = %queue.name(), "driver_suspended");
        return;
      }
      Step::Drain => {
        if queue.drain(generation) {
          return;
        }
      }
      Step::Wait => queue.inner.wake.notified().await,
      Step::Dispatch => {
        let permit = tokio::select! {
          permit = queue.inner.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
          },
          _ = queue.inner.wake.notified() => continue,
        };

        if let Some(job) = queue.dispatch_next(generation) {
          tokio::spawn(execute(queue.clone(), job, permit));
        }
      }
    }
  }
}

#[instrument(
  name = "job_execute",
  skip(queue, job, permit),
  fields(queue = %queue.name(), job_id = %job.id, task = %job.task_name)
)]
async fn execute(queue: Queue, job: Job, permit: OwnedSemaphorePermit) {
  let scope = queue.scope();
  let mut permit = Some(permit);

  let outputs = loop {
    match queue.dependencies(&job) {
      Dependencies::Ready(outputs) => break outputs,
      Dependencies::Stopped => {
        queue.settle(job.id, Err(JobError::aborted()));
        return;
      }
      Dependencies::Failed { dependency } => match scope.config.failure_policy {
        FailurePolicy::FailFast => {
          queue.settle(
            job.id,
            Err(JobError::DependencyFailed {
              dependency,
              task: job.task_name.clone(),
            }),
          );
          return;
        }
        FailurePolicy::ProceedEmpty => {
          warn!(dependency = %dependency, "dependency_failed_proceeding_empty");
          break Vec::new();
        }
      },
      Dependencies::Pending(waits) => {
        permit = None;
        debug!(producers = waits.len(), "job_waiting");
        futures::future::join_all(waits).await;
      }
    }
  };

  let permit = match permit {
    Some(permit) => permit,
    None => match queue.inner.permits.clone().acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => return,
    },
  };

  // Aborted while waiting.
  if !queue.is_unsettled(job.id) {
    return;
  }

  let outcome = invoke(&queue, &job, &outputs, &scope).await;
  drop(permit);
  queue.settle(job.id, outcome);
}

async fn invoke(
  queue: &Queue,
  job: &Job,
  outputs: &[Value],
  scope: &FlowScope,
) -> Result<Value, JobError> {
  let input = materialize_input(job, outputs, scope).map_err(|e| JobError::Execution {
    message: e.to_string(),
  })?;

  let resolver = scope.registry.get(&job.resolver.name).ok_or_else(|| {
    JobError::from(ResolverError::UnknownResolver {
      name: job.resolver.name.clone(),
    })
  })?;

  let ctx = WorkerContext::new(queue.clone(), job.clone(), scope.clone());
  // A panicking resolver must still settle its job.
  let handle = tokio::spawn(async move { resolver.resolve(input, ctx).await });
  match handle.await {
    Ok(result) => result.map_err(JobError::from),
    Err(e) => Err(JobError::Execution {
      message: format!("resolver task failed: {}", e),
    }),
  }
}
