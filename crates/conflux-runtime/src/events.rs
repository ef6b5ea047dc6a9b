//! Execution events and notifiers for observability.
//!
//! Events mirror the queue's lifecycle so consumers can persist progress or
//! stream it elsewhere. They are independent of the per-job callback
//! registry, which the queue also uses internally for dependency waits.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a queue executes jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  JobStarted {
    queue_id: String,
    job_id: String,
    task: String,
  },

  JobSucceeded {
    queue_id: String,
    job_id: String,
    task: String,
    data: serde_json::Value,
  },

  JobFailed {
    queue_id: String,
    job_id: String,
    task: String,
    error: String,
  },

  /// The job was aborted by `stop()` or `abort()` before completing.
  JobAborted {
    queue_id: String,
    job_id: String,
    task: String,
  },

  /// No pending or in-flight jobs remain.
  QueueDrained { queue_id: String, results: usize },

  QueueStopped { queue_id: String, aborted: usize },
}

/// Receives execution events.
///
/// The queue calls `notify` outside of its internal lock, so
/// implementations may call back into the queue.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls job settlement.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
