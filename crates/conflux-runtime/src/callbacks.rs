//! Callback registry keyed by job, event, and caller.
//!
//! Used for public lifecycle subscriptions and for dependency waits. A
//! [`Caller::Any`] entry and any number of caller-specific entries can
//! coexist for the same job and event; dispatch fires all of them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::job::{Job, JobEvent, JobId};

/// Callback invoked with the event and a snapshot of the job.
pub type Handler = Arc<dyn Fn(JobEvent, &Job) + Send + Sync>;

/// Identifies who registered a job-scoped callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caller {
  /// Catches the event regardless of which caller is waiting.
  Any,
  Id(String),
}

impl From<JobId> for Caller {
  fn from(id: JobId) -> Self {
    Self::Id(id.to_string())
  }
}

impl From<&str> for Caller {
  fn from(id: &str) -> Self {
    Self::Id(id.to_string())
  }
}

pub(crate) enum Listener {
  Handler(Handler),
  /// Wakes a single waiter. Dropping the sender also wakes it.
  Once(oneshot::Sender<JobEvent>),
}

impl Listener {
  pub(crate) fn fire(self, event: JobEvent, job: &Job) {
    match self {
      Self::Handler(handler) => handler(event, job),
      Self::Once(sender) => {
        let _ = sender.send(event);
      }
    }
  }
}

pub(crate) fn fire_all(listeners: Vec<Listener>, event: JobEvent, job: &Job) {
  for listener in listeners {
    listener.fire(event, job);
  }
}

#[derive(Default)]
pub(crate) struct CallbackRegistry {
  jobs: HashMap<(JobId, JobEvent), HashMap<Caller, Listener>>,
  queue: HashMap<JobEvent, Vec<Handler>>,
}

impl CallbackRegistry {
  /// Register a job-scoped listener, replacing any previous one for the
  /// same caller.
  pub(crate) fn register(
    &mut self,
    job_id: JobId,
    event: JobEvent,
    caller: Caller,
    listener: Listener,
  ) {
    self
      .jobs
      .entry((job_id, event))
      .or_default()
      .insert(caller, listener);
  }

  /// Register a handler for `event` on every job.
  pub(crate) fn register_queue(&mut self, event: JobEvent, handler: Handler) {
    self.queue.entry(event).or_default().push(handler);
  }

  /// Take everything that should fire for `event` on `job_id`.
  ///
  /// Job-scoped listeners fire at most once per key. A terminal event also
  /// drops the job's remaining listeners, so waiters on the other terminal
  /// event are released.
  pub(crate) fn take(&mut self, job_id: JobId, event: JobEvent) -> Vec<Listener> {
    let mut fired: Vec<Listener> = self
      .jobs
      .remove(&(job_id, event))
      .map(|listeners| listeners.into_values().collect())
      .unwrap_or_default();

    if event.is_terminal() {
      self.remove_job(job_id);
    }

    if let Some(handlers) = self.queue.get(&event) {
      fired.extend(handlers.iter().cloned().map(Listener::Handler));
    }

    fired
  }

  pub(crate) fn remove_job(&mut self, job_id: JobId) {
    self.jobs.retain(|(id, _), _| *id != job_id);
  }

  /// Drop every registered listener and return them so the caller can
  /// release them outside its lock.
  pub(crate) fn dispose(&mut self) -> CallbackRegistry {
    std::mem::take(self)
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    let jobs: usize = self.jobs.values().map(HashMap::len).sum();
    let queue: usize = self.queue.values().map(Vec::len).sum();
    jobs + queue
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use conflux_config::TaskSpec;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn job() -> Job {
    Job::new("task", &TaskSpec::new("Noop"))
  }

  fn counting(counter: &Arc<AtomicUsize>) -> Listener {
    let counter = counter.clone();
    Listener::Handler(Arc::new(move |_: JobEvent, _: &Job| {
      counter.fetch_add(1, Ordering::SeqCst);
    }))
  }

  #[test]
  fn test_wildcard_and_specific_callers_both_fire() {
    let job = job();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = CallbackRegistry::default();
    registry.register(job.id, JobEvent::Success, Caller::Any, counting(&counter));
    registry.register(job.id, JobEvent::Success, Caller::from("a"), counting(&counter));
    registry.register(job.id, JobEvent::Success, Caller::from("b"), counting(&counter));

    fire_all(registry.take(job.id, JobEvent::Success), JobEvent::Success, &job);

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(registry.len(), 0);
  }

  #[test]
  fn test_same_caller_replaces() {
    let job = job();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = CallbackRegistry::default();
    registry.register(job.id, JobEvent::Error, Caller::from("a"), counting(&counter));
    registry.register(job.id, JobEvent::Error, Caller::from("a"), counting(&counter));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_terminal_event_releases_other_waiters() {
    let job = job();
    let mut registry = CallbackRegistry::default();
    let (tx, mut rx) = oneshot::channel();
    registry.register(job.id, JobEvent::Success, Caller::from(job.id), Listener::Once(tx));

    let fired = registry.take(job.id, JobEvent::Error);

    assert!(fired.is_empty());
    assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
  }

  #[test]
  fn test_start_keeps_terminal_listeners() {
    let job = job();
    let mut registry = CallbackRegistry::default();
    let (tx, _rx) = oneshot::channel();
    registry.register(job.id, JobEvent::Success, Caller::Any, Listener::Once(tx));

    registry.take(job.id, JobEvent::Start);

    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn test_queue_handlers_persist() {
    let first = job();
    let second = job();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = CallbackRegistry::default();
    let handler = counter.clone();
    registry.register_queue(
      JobEvent::Success,
      Arc::new(move |_: JobEvent, _: &Job| {
        handler.fetch_add(1, Ordering::SeqCst);
      }),
    );

    for job in [&first, &second] {
      fire_all(registry.take(job.id, JobEvent::Success), JobEvent::Success, job);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_dispose_wakes_waiters() {
    let job = job();
    let mut registry = CallbackRegistry::default();
    let (tx, mut rx) = oneshot::channel();
    registry.register(job.id, JobEvent::Success, Caller::Any, Listener::Once(tx));

    drop(registry.dispose());

    assert_eq!(registry.len(), 0);
    assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
  }
}
