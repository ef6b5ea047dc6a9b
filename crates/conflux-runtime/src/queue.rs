//! Dependency-aware job queue.
//!
//! A [`Queue`] is a cheap, cloneable handle. All state lives behind a single
//! mutex that is never held across an await; callbacks, notifier events, and
//! log lines are emitted after the lock is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use conflux_template::remap;
use futures::future::{self, Select};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, Semaphore, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::callbacks::{CallbackRegistry, Caller, Handler, Listener, fire_all};
use crate::config::RuntimeConfig;
use crate::context::FlowScope;
use crate::error::{JobError, QueueError};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::job::{Job, JobEvent, JobId, JobStatus};
use crate::registry::Registry;
use crate::scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Paused,
  Running,
  /// Terminal; a stopped queue cannot be restarted.
  Stopped,
}

impl fmt::Display for QueueStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Paused => f.write_str("paused"),
      Self::Running => f.write_str("running"),
      Self::Stopped => f.write_str("stopped"),
    }
  }
}

/// Outcome of [`Queue::stop`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopReport {
  pub queue_id: Uuid,
  /// Jobs that were still pending and have been aborted.
  pub aborted: Vec<JobId>,
}

/// Point-in-time copy of the queue's jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
  pub queue_id: Uuid,
  pub status: QueueStatus,
  /// Not yet started, in dispatch order.
  pub pending: Vec<Job>,
  pub in_flight: Vec<Job>,
  /// Settled jobs in completion order.
  pub results: Vec<Job>,
}

type DrainHandler = Box<dyn FnOnce(QueueSnapshot) + Send>;
type EndHandler = Box<dyn FnOnce(&QueueSnapshot) + Send>;

/// A dependency wait on one producer: resolves on its success or error, or
/// when its listeners are dropped.
pub(crate) type DependencyWait = Select<oneshot::Receiver<JobEvent>, oneshot::Receiver<JobEvent>>;

/// How a job's required keys currently stand.
pub(crate) enum Dependencies {
  /// Every producer succeeded. Outputs are in producer enqueue order.
  Ready(Vec<Value>),
  Failed { dependency: String },
  Pending(Vec<DependencyWait>),
  Stopped,
}

pub(crate) struct QueueState {
  pub(crate) status: QueueStatus,
  pub(crate) generation: u64,
  drained: Option<u64>,
  next_seq: u64,
  jobs: HashMap<JobId, Job>,
  pub(crate) pending: VecDeque<JobId>,
  pub(crate) in_flight: HashSet<JobId>,
  results: Vec<JobId>,
  /// Output key to the jobs that advertise it.
  providers: HashMap<String, Vec<JobId>>,
  callbacks: CallbackRegistry,
  end_handlers: Vec<EndHandler>,
  on_drain: Option<DrainHandler>,
  scope: FlowScope,
}

impl QueueState {
  fn jobs_for<'a>(&'a self, ids: impl IntoIterator<Item = &'a JobId>) -> Vec<Job> {
    ids
      .into_iter()
      .filter_map(|id| self.jobs.get(id))
      .cloned()
      .collect()
  }

  fn snapshot(&self, queue_id: Uuid) -> QueueSnapshot {
    let mut in_flight = self.jobs_for(&self.in_flight);
    in_flight.sort_by_key(|job| job.seq);
    QueueSnapshot {
      queue_id,
      status: self.status,
      pending: self.jobs_for(&self.pending),
      in_flight,
      results: self.jobs_for(&self.results),
    }
  }

  fn unregister_provider(&mut self, job: &Job) {
    for key in &job.provides {
      if let Some(ids) = self.providers.get_mut(key) {
        ids.retain(|id| *id != job.id);
        if ids.is_empty() {
          self.providers.remove(key);
        }
      }
    }
  }
}

pub(crate) struct QueueInner {
  pub(crate) id: Uuid,
  pub(crate) name: String,
  state: Mutex<QueueState>,
  /// Wakes the driver when pending work, settlement, or status changes.
  pub(crate) wake: Notify,
  /// Limits concurrently executing resolvers.
  pub(crate) permits: Arc<Semaphore>,
  notifier: Arc<dyn ExecutionNotifier>,
}

/// Holds jobs and runs them once their required keys are available.
///
/// # Usage
///
/// ```ignore
/// let queue = Queue::new(RuntimeConfig::default());
/// let jobs = queue.enqueue(vec![Job::new("echo", &task)])?;
/// queue.follow(jobs[0].id, |event, job| println!("{} {}", job.task_name, event));
/// queue.start_with(|snapshot| println!("{} settled", snapshot.results.len()))?;
/// ```
#[derive(Clone)]
pub struct Queue {
  pub(crate) inner: Arc<QueueInner>,
}

impl fmt::Debug for Queue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Queue")
      .field("id", &self.inner.id)
      .field("name", &self.inner.name)
      .field("status", &self.status())
      .finish()
  }
}

impl Queue {
  pub fn new(config: RuntimeConfig) -> Self {
    Self::build(None, config, Arc::new(NoopNotifier))
  }

  pub fn named(name: impl Into<String>, config: RuntimeConfig) -> Self {
    Self::build(Some(name.into()), config, Arc::new(NoopNotifier))
  }

  pub fn with_notifier(config: RuntimeConfig, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    Self::build(None, config, notifier)
  }

  pub(crate) fn build(
    name: Option<String>,
    config: RuntimeConfig,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    let config = config.normalized();
    let id = Uuid::new_v4();
    let state = QueueState {
      status: QueueStatus::Paused,
      generation: 0,
      drained: None,
      next_seq: 0,
      jobs: HashMap::new(),
      pending: VecDeque::new(),
      in_flight: HashSet::new(),
      results: Vec::new(),
      providers: HashMap::new(),
      callbacks: CallbackRegistry::default(),
      end_handlers: Vec::new(),
      on_drain: None,
      scope: FlowScope::new(Registry::builtin(), config.clone()),
    };

    Self {
      inner: Arc::new(QueueInner {
        id,
        name: name.unwrap_or_else(|| id.to_string()),
        state: Mutex::new(state),
        wake: Notify::new(),
        permits: Arc::new(Semaphore::new(config.concurrency)),
        notifier,
      }),
    }
  }

  pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
    // Critical sections are single steps, so a poisoned state is still consistent.
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  pub fn id(&self) -> Uuid {
    self.inner.id
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn status(&self) -> QueueStatus {
    self.lock().status
  }

  /// Scope used for job executions that start after this call.
  pub fn set_scope(&self, scope: FlowScope) {
    self.lock().scope = scope;
  }

  pub fn scope(&self) -> FlowScope {
    self.lock().scope.clone()
  }

  /// Look up a job by id across pending, in-flight, and settled jobs.
  pub fn job(&self, job_id: JobId) -> Option<Job> {
    self.lock().jobs.get(&job_id).cloned()
  }

  pub fn snapshot(&self) -> QueueSnapshot {
    self.lock().snapshot(self.inner.id)
  }

  /// Add jobs to the pending list.
  ///
  /// Every job is validated first; if any is malformed the error is logged
  /// and returned, and none of the jobs are enqueued. The returned jobs
  /// carry their assigned enqueue order.
  pub fn enqueue(&self, jobs: Vec<Job>) -> Result<Vec<Job>, QueueError> {
    let mut guard = self.lock();
    let state = &mut *guard;

    if state.status == QueueStatus::Stopped {
      return Err(self.invalid_state("enqueue into", state.status));
    }

    for job in &jobs {
      let problem = match job.validate() {
        Err(message) => Some(message),
        Ok(()) if state.jobs.contains_key(&job.id) => Some(format!("job {} already enqueued", job.id)),
        Ok(()) => None,
      };
      if let Some(message) = problem {
        error!(
          queue = %self.inner.name,
          task = %job.task_name,
          error = %message,
          "job_validation_failed"
        );
        return Err(QueueError::Validation {
          task: job.task_name.clone(),
          message,
        });
      }
    }

    let mut enqueued = Vec::with_capacity(jobs.len());
    for mut job in jobs {
      job.seq = state.next_seq;
      state.next_seq += 1;
      for key in &job.provides {
        state.providers.entry(key.clone()).or_default().push(job.id);
      }
      state.pending.push_back(job.id);
      state.jobs.insert(job.id, job.clone());
      debug!(queue = %self.inner.name, job_id = %job.id, task = %job.task_name, "job_enqueued");
      enqueued.push(job);
    }
    drop(guard);

    if !enqueued.is_empty() {
      self.inner.wake.notify_one();
    }
    Ok(enqueued)
  }

  /// Remove a job that has not started yet. Returns `None` if the job is
  /// unknown, running, or settled.
  pub fn dequeue(&self, job_id: JobId) -> Option<Job> {
    let mut guard = self.lock();
    let state = &mut *guard;

    let position = state.pending.iter().position(|id| *id == job_id)?;
    state.pending.remove(position);
    let job = state.jobs.remove(&job_id)?;
    state.unregister_provider(&job);
    // Releases anything waiting on this job so it can re-check its producers.
    state.callbacks.remove_job(job_id);
    drop(guard);

    debug!(queue = %self.inner.name, job_id = %job_id, task = %job.task_name, "job_dequeued");
    Some(job)
  }

  /// Begin executing pending jobs.
  pub fn start(&self) -> Result<(), QueueError> {
    self.begin(None)
  }

  /// Begin executing pending jobs and call `on_drain` once no pending or
  /// in-flight jobs remain.
  pub fn start_with<F>(&self, on_drain: F) -> Result<(), QueueError>
  where
    F: FnOnce(QueueSnapshot) + Send + 'static,
  {
    self.begin(Some(Box::new(on_drain)))
  }

  fn begin(&self, on_drain: Option<DrainHandler>) -> Result<(), QueueError> {
    let generation = {
      let mut state = self.lock();
      if state.status != QueueStatus::Paused {
        return Err(self.invalid_state("start", state.status));
      }
      state.status = QueueStatus::Running;
      state.generation += 1;
      if on_drain.is_some() {
        state.on_drain = on_drain;
      }
      state.generation
    };

    info!(queue = %self.inner.name, queue_id = %self.inner.id, "queue_started");
    tokio::spawn(scheduler::drive(self.clone(), generation));
    Ok(())
  }

  /// Stop pulling new jobs. Running jobs continue; `start` resumes.
  pub fn pause(&self) -> Result<(), QueueError> {
    {
      let mut state = self.lock();
      if state.status != QueueStatus::Running {
        return Err(self.invalid_state("pause", state.status));
      }
      state.status = QueueStatus::Paused;
    }

    self.inner.wake.notify_one();
    info!(queue = %self.inner.name, "queue_paused");
    Ok(())
  }

  /// Abort every pending job, forget in-flight jobs, and drop all callbacks.
  ///
  /// Resolvers already executing run to completion. Their results are still
  /// recorded but arrive after the drain.
  pub fn stop(&self) -> Result<StopReport, QueueError> {
    let (aborted, disposed) = {
      let mut guard = self.lock();
      let state = &mut *guard;
      if state.status != QueueStatus::Running {
        return Err(self.invalid_state("stop", state.status));
      }
      state.status = QueueStatus::Stopped;

      let mut aborted = Vec::with_capacity(state.pending.len());
      while let Some(id) = state.pending.pop_front() {
        let Some(job) = state.jobs.get_mut(&id) else {
          continue;
        };
        job.fail(JobError::aborted());
        let job = job.clone();
        state.results.push(id);
        let listeners = state.callbacks.take(id, JobEvent::Error);
        aborted.push((job, listeners));
      }
      state.in_flight.clear();
      (aborted, state.callbacks.dispose())
    };

    let report = StopReport {
      queue_id: self.inner.id,
      aborted: aborted.iter().map(|(job, _)| job.id).collect(),
    };

    for (job, listeners) in aborted {
      self.report(&job);
      fire_all(listeners, JobEvent::Error, &job);
    }
    drop(disposed);
    self.inner.wake.notify_one();

    info!(queue = %self.inner.name, aborted = report.aborted.len(), "queue_stopped");
    self.inner.notifier.notify(ExecutionEvent::QueueStopped {
      queue_id: self.inner.id.to_string(),
      aborted: report.aborted.len(),
    });
    Ok(report)
  }

  /// Abort a single job that has not settled.
  ///
  /// A resolver already executing for the job is not interrupted; its
  /// eventual result is discarded.
  pub fn abort(&self, job_id: JobId) -> Result<Job, QueueError> {
    match self.job(job_id) {
      None => return Err(QueueError::JobNotFound { job_id }),
      Some(job) if job.is_settled() => return Err(QueueError::AlreadySettled { job_id }),
      Some(_) => {}
    }

    self.settle(job_id, Err(JobError::aborted()));
    self.job(job_id).ok_or(QueueError::JobNotFound { job_id })
  }

  /// Call `handler` for `event` on every job.
  pub fn on<F>(&self, event: JobEvent, handler: F)
  where
    F: Fn(JobEvent, &Job) + Send + Sync + 'static,
  {
    self.lock().callbacks.register_queue(event, Arc::new(handler));
  }

  /// Call `handler` when `job_id` emits `event`. A later registration for
  /// the same caller replaces this one.
  pub fn on_job<F>(&self, job_id: JobId, event: JobEvent, caller: Caller, handler: F)
  where
    F: Fn(JobEvent, &Job) + Send + Sync + 'static,
  {
    let handler: Handler = Arc::new(handler);
    self
      .lock()
      .callbacks
      .register(job_id, event, caller, Listener::Handler(handler));
  }

  /// Receive `start` and then the terminal event of `job_id`.
  pub fn follow<F>(&self, job_id: JobId, handler: F)
  where
    F: Fn(JobEvent, &Job) + Send + Sync + 'static,
  {
    let handler: Handler = Arc::new(handler);
    let caller = Caller::Id(format!("follow:{}", Uuid::new_v4()));
    let mut state = self.lock();
    for event in [JobEvent::Start, JobEvent::Success, JobEvent::Error] {
      state.callbacks.register(
        job_id,
        event,
        caller.clone(),
        Listener::Handler(handler.clone()),
      );
    }
  }

  /// Call `handler` with the final snapshot when the queue drains, before
  /// callbacks are disposed.
  pub fn on_end<F>(&self, handler: F)
  where
    F: FnOnce(&QueueSnapshot) + Send + 'static,
  {
    self.lock().end_handlers.push(Box::new(handler));
  }

  /// Move the next pending job in flight and announce it.
  pub(crate) fn dispatch_next(&self, generation: u64) -> Option<Job> {
    let (job, listeners) = {
      let mut guard = self.lock();
      let state = &mut *guard;
      if state.generation != generation || state.status != QueueStatus::Running {
        return None;
      }

      let id = state.pending.pop_front()?;
      let job = state.jobs.get_mut(&id)?;
      job.started_at = Some(Utc::now());
      let job = job.clone();
      state.in_flight.insert(id);
      (job, state.callbacks.take(id, JobEvent::Start))
    };

    info!(
      queue = %self.inner.name,
      job_id = %job.id,
      task = %job.task_name,
      resolver = %job.resolver.name,
      "job_started"
    );
    self.inner.notifier.notify(ExecutionEvent::JobStarted {
      queue_id: self.inner.id.to_string(),
      job_id: job.id.to_string(),
      task: job.task_name.clone(),
    });
    fire_all(listeners, JobEvent::Start, &job);
    Some(job)
  }

  /// Classify the producers of `job`'s required keys, registering waits on
  /// unsettled producers in the same step.
  pub(crate) fn dependencies(&self, job: &Job) -> Dependencies {
    let mut guard = self.lock();
    let state = &mut *guard;

    if state.status == QueueStatus::Stopped {
      return Dependencies::Stopped;
    }

    let mut ids: Vec<JobId> = job
      .requires
      .iter()
      .filter_map(|key| state.providers.get(key))
      .flatten()
      .copied()
      .filter(|id| *id != job.id)
      .collect();
    ids.sort();
    ids.dedup();

    let mut producers: Vec<&Job> = ids.iter().filter_map(|id| state.jobs.get(id)).collect();
    producers.sort_by_key(|producer| producer.seq);

    if let Some(failed) = producers.iter().find(|p| p.status == JobStatus::Error) {
      return Dependencies::Failed {
        dependency: failed.task_name.clone(),
      };
    }

    let unsettled: Vec<JobId> = producers
      .iter()
      .filter(|p| !p.is_settled())
      .map(|p| p.id)
      .collect();

    if unsettled.is_empty() {
      return Dependencies::Ready(producers.into_iter().map(remapped_output).collect());
    }

    let waits = unsettled
      .into_iter()
      .map(|producer| {
        let (success_tx, success_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        let caller = Caller::from(job.id);
        state.callbacks.register(
          producer,
          JobEvent::Success,
          caller.clone(),
          Listener::Once(success_tx),
        );
        state
          .callbacks
          .register(producer, JobEvent::Error, caller, Listener::Once(error_tx));
        future::select(success_rx, error_rx)
      })
      .collect();

    Dependencies::Pending(waits)
  }

  pub(crate) fn is_unsettled(&self, job_id: JobId) -> bool {
    self
      .lock()
      .jobs
      .get(&job_id)
      .is_some_and(|job| !job.is_settled())
  }

  /// Record a job's outcome and notify everything listening for it.
  ///
  /// Outcomes for jobs that already settled (for example, aborted while
  /// their resolver was running) are ignored.
  pub(crate) fn settle(&self, job_id: JobId, outcome: Result<Value, JobError>) {
    let (job, event, listeners, status) = {
      let mut guard = self.lock();
      let state = &mut *guard;
      let Some(job) = state.jobs.get_mut(&job_id) else {
        return;
      };
      if job.is_settled() {
        debug!(queue = %self.inner.name, job_id = %job_id, "late_settlement_ignored");
        return;
      }

      let event = match outcome {
        Ok(data) => {
          job.succeed(data);
          JobEvent::Success
        }
        Err(e) => {
          job.fail(e);
          JobEvent::Error
        }
      };
      let job = job.clone();
      state.in_flight.remove(&job_id);
      state.pending.retain(|id| *id != job_id);
      state.results.push(job_id);
      let listeners = state.callbacks.take(job_id, event);
      (job, event, listeners, state.status)
    };

    if status == QueueStatus::Stopped {
      debug!(queue = %self.inner.name, job_id = %job_id, "job_settled_after_stop");
    }
    self.report(&job);
    fire_all(listeners, event, &job);
    self.inner.wake.notify_one();
  }

  /// Finish a run: fire end handlers and the drain callback with a snapshot.
  ///
  /// Returns false if work arrived since the driver last looked, in which
  /// case nothing happens.
  pub(crate) fn drain(&self, generation: u64) -> bool {
    let (snapshot, end_handlers, on_drain, disposed) = {
      let mut guard = self.lock();
      let state = &mut *guard;
      if state.generation != generation || state.drained == Some(generation) {
        return true;
      }
      if state.status == QueueStatus::Running
        && (!state.pending.is_empty() || !state.in_flight.is_empty())
      {
        return false;
      }

      state.drained = Some(generation);
      if state.status == QueueStatus::Running {
        state.status = QueueStatus::Paused;
      }
      let snapshot = state.snapshot(self.inner.id);
      (
        snapshot,
        std::mem::take(&mut state.end_handlers),
        state.on_drain.take(),
        state.callbacks.dispose(),
      )
    };

    info!(
      queue = %self.inner.name,
      results = snapshot.results.len(),
      status = %snapshot.status,
      "queue_drained"
    );
    self.inner.notifier.notify(ExecutionEvent::QueueDrained {
      queue_id: self.inner.id.to_string(),
      results: snapshot.results.len(),
    });

    for handler in end_handlers {
      handler(&snapshot);
    }
    drop(disposed);
    if let Some(on_drain) = on_drain {
      on_drain(snapshot);
    }
    true
  }

  fn report(&self, job: &Job) {
    let queue_id = self.inner.id.to_string();
    let job_id = job.id.to_string();
    let task = job.task_name.clone();

    match (&job.status, &job.error) {
      (JobStatus::Success, _) => {
        info!(queue = %self.inner.name, job_id = %job_id, task = %task, "job_succeeded");
        self.inner.notifier.notify(ExecutionEvent::JobSucceeded {
          queue_id,
          job_id,
          task,
          data: job.data.clone().unwrap_or(Value::Null),
        });
      }
      (_, Some(e)) if e.is_aborted() => {
        warn!(queue = %self.inner.name, job_id = %job_id, task = %task, "job_aborted");
        self.inner.notifier.notify(ExecutionEvent::JobAborted {
          queue_id,
          job_id,
          task,
        });
      }
      (_, error) => {
        let error = error.as_ref().map(ToString::to_string).unwrap_or_default();
        error!(queue = %self.inner.name, job_id = %job_id, task = %task, error = %error, "job_failed");
        self.inner.notifier.notify(ExecutionEvent::JobFailed {
          queue_id,
          job_id,
          task,
          error,
        });
      }
    }
  }

  fn invalid_state(&self, operation: &'static str, status: QueueStatus) -> QueueError {
    QueueError::InvalidState {
      queue: self.inner.name.clone(),
      operation,
      status,
    }
  }
}

/// A settled job's output as dependents and flow output see it: remapped
/// through its `results` map when one is declared.
pub(crate) fn remapped_output(job: &Job) -> Value {
  let data = job.data.clone().unwrap_or(Value::Null);
  match &job.resolver.results {
    Some(map) => remap(&data, map),
    None => data,
  }
}
