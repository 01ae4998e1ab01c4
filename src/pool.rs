use crate::dispatch::{InFlightSet, LocalInFlight, SpawnedInFlight};
use crate::error::{PoolError, TaskFailure};
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::options::{FailurePolicy, RunOptions};
use crate::handle::AbortHandle;
use crate::run::Run;
use crate::task::Outcome;

use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A bounded-concurrency executor that maps an async function over ordered inputs.
///
/// Each call to one of the `run*` methods is an independent run: inputs are
/// admitted in order, at most `min(limit, inputs)` executions are unsettled at
/// any instant, a freed slot is refilled as soon as any execution settles, and
/// results come back in input order regardless of completion order.
///
/// Cloning is cheap and clones share their name, counters and completion handlers.
#[derive(Clone)]
pub struct TaskPool {
  pool_name: Arc<String>,
  limit: usize,
  runtime: Option<TokioHandle>,
  options: RunOptions,
  active_runs: Arc<DashMap<u64, usize>>,
  active_task_info: Arc<DashMap<(u64, usize), Instant>>,
  peak_in_flight: Arc<AtomicUsize>,
  notifier: CompletionNotifier,
}

impl fmt::Debug for TaskPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskPool")
      .field("pool_name", &self.pool_name)
      .field("limit", &self.limit)
      .field("options", &self.options)
      .field("active_runs", &self.active_runs.len())
      .field("active_tasks", &self.active_task_info.len())
      .field("peak_in_flight", &self.peak_in_flight())
      .field("notifier", &self.notifier)
      .finish()
  }
}

impl TaskPool {
  /// Creates a pool. A `limit` of zero is reported as `PoolError::InvalidArgument`
  /// by every run, before anything is admitted.
  pub fn new(limit: usize, pool_name: &str) -> Self {
    Self {
      pool_name: Arc::new(pool_name.to_string()),
      limit,
      runtime: None,
      options: RunOptions::default(),
      active_runs: Arc::new(DashMap::new()),
      active_task_info: Arc::new(DashMap::new()),
      peak_in_flight: Arc::new(AtomicUsize::new(0)),
      notifier: CompletionNotifier::default(),
    }
  }

  /// Runtime the `run*` methods spawn executions on. Defaults to the runtime the run is awaited on.
  pub fn with_handle(mut self, tokio_handle: TokioHandle) -> Self {
    self.runtime = Some(tokio_handle);
    self
  }

  pub fn with_options(mut self, options: RunOptions) -> Self {
    self.options = options;
    self
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  pub fn options(&self) -> &RunOptions {
    &self.options
  }

  /// Executions admitted by live runs of this pool (and its clones) that have not settled.
  pub fn active_task_count(&self) -> usize {
    self.active_task_info.len()
  }

  pub fn active_run_count(&self) -> usize {
    self.active_runs.len()
  }

  /// Registers a handler invoked for every settlement a run observes.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(&self.pool_name, handler);
  }

  /// The largest number of unsettled executions any single run of this pool
  /// (or its clones) has had at once. Never exceeds `min(limit, inputs)`.
  pub fn peak_in_flight(&self) -> usize {
    self.peak_in_flight.load(AtomicOrdering::Relaxed)
  }

  /// Runs every input through `executor` with fail-fast semantics.
  ///
  /// Each admitted execution is spawned on the pool's runtime, so executions
  /// abandoned by a failure or an abort keep running to settlement in the
  /// background; their results are discarded.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidArgument` for a zero limit or zero timeout,
  /// `PoolError::NoRuntime` outside of a Tokio runtime with no handle set,
  /// `PoolError::TaskFailed` carrying the first failure, or `PoolError::Aborted`
  /// if the configured abort handle fires first.
  pub async fn run<T, R, E, F, Fut>(&self, inputs: impl IntoIterator<Item = T>, executor: F) -> Result<Vec<R>, PoolError<E>>
  where
    T: Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: IntoFuture<Output = Result<R, E>> + Send + 'static,
    Fut::IntoFuture: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    let outcomes = self.run_with_policy(inputs, executor, FailurePolicy::FailFast).await?;
    into_values(outcomes)
  }

  /// Runs every input through `executor` and reports one outcome per input.
  ///
  /// The outer error is only ever an argument or runtime error; executor
  /// failures, panics, timeouts and unadmitted inputs are reported in their slot.
  pub async fn run_settled<T, R, E, F, Fut>(
    &self,
    inputs: impl IntoIterator<Item = T>,
    executor: F,
  ) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    T: Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: IntoFuture<Output = Result<R, E>> + Send + 'static,
    Fut::IntoFuture: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    self.run_with_policy(inputs, executor, FailurePolicy::CollectAll).await
  }

  /// Spawned run with the failure policy chosen at runtime.
  pub async fn run_with_policy<T, R, E, F, Fut>(
    &self,
    inputs: impl IntoIterator<Item = T>,
    executor: F,
    policy: FailurePolicy,
  ) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    T: Send + 'static,
    F: Fn(T, usize) -> Fut + Send + Sync + 'static,
    Fut: IntoFuture<Output = Result<R, E>> + Send + 'static,
    Fut::IntoFuture: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
  {
    let run = self.prepare_run(inputs)?;
    let runtime = match &self.runtime {
      Some(handle) => handle.clone(),
      None => self.current_runtime::<E>()?,
    };
    let in_flight: SpawnedInFlight<_, R, E> = SpawnedInFlight::new(executor, self.options.task_timeout(), runtime, run.run_id());
    self.drive(run, in_flight, policy).await
  }

  /// Like `run`, but every execution is polled on the calling task instead of
  /// being spawned, so the executor may borrow and need not be `Send`.
  ///
  /// Executions still unsettled when the run fails fast are dropped with it.
  /// A task timeout needs a Tokio runtime; without one this returns
  /// `PoolError::NoRuntime`.
  pub async fn run_local<T, R, E, F, Fut>(
    &self,
    inputs: impl IntoIterator<Item = T>,
    executor: F,
  ) -> Result<Vec<R>, PoolError<E>>
  where
    F: Fn(T, usize) -> Fut,
    Fut: IntoFuture<Output = Result<R, E>>,
  {
    let outcomes = self
      .run_local_with_policy(inputs, executor, FailurePolicy::FailFast)
      .await?;
    into_values(outcomes)
  }

  /// Like `run_settled`, but every execution is polled on the calling task.
  pub async fn run_local_settled<T, R, E, F, Fut>(
    &self,
    inputs: impl IntoIterator<Item = T>,
    executor: F,
  ) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    F: Fn(T, usize) -> Fut,
    Fut: IntoFuture<Output = Result<R, E>>,
  {
    self
      .run_local_with_policy(inputs, executor, FailurePolicy::CollectAll)
      .await
  }

  pub async fn run_local_with_policy<T, R, E, F, Fut>(
    &self,
    inputs: impl IntoIterator<Item = T>,
    executor: F,
    policy: FailurePolicy,
  ) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    F: Fn(T, usize) -> Fut,
    Fut: IntoFuture<Output = Result<R, E>>,
  {
    let run = self.prepare_run(inputs)?;
    if self.options.task_timeout().is_some() {
      self.current_runtime::<E>()?;
    }
    let in_flight = LocalInFlight::new(&executor, self.options.task_timeout());
    self.drive(run, in_flight, policy).await
  }

  fn current_runtime<E>(&self) -> Result<TokioHandle, PoolError<E>> {
    TokioHandle::try_current().map_err(|_| {
      error!(pool_name = %self.pool_name, "Run needs a Tokio runtime but none is running.");
      PoolError::NoRuntime
    })
  }

  /// Validates arguments and allocates the run. Nothing is admitted here.
  fn prepare_run<T, R, E>(&self, inputs: impl IntoIterator<Item = T>) -> Result<Run<T, R, E>, PoolError<E>> {
    if self.limit == 0 {
      warn!(pool_name = %self.pool_name, "Rejecting run: concurrency limit must be at least 1.");
      return Err(PoolError::InvalidArgument(
        "concurrency limit must be at least 1".to_string(),
      ));
    }
    if self.options.task_timeout() == Some(Duration::ZERO) {
      warn!(pool_name = %self.pool_name, "Rejecting run: task timeout must be non-zero.");
      return Err(PoolError::InvalidArgument("task timeout must be non-zero".to_string()));
    }

    let inputs: Vec<T> = inputs.into_iter().collect();
    let run_id = NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    Ok(Run::new(run_id, self.limit, inputs))
  }

  async fn drive<T, R, E, S>(&self, run: Run<T, R, E>, in_flight: S, policy: FailurePolicy) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    S: InFlightSet<T, R, E>,
  {
    let span = info_span!(
      "task_pool_run",
      pool_name = %*self.pool_name,
      run_id = run.run_id(),
      limit = run.limit(),
      inputs = run.total(),
    );
    self.dispatch_loop(run, in_flight, policy).instrument(span).await
  }

  async fn dispatch_loop<T, R, E, S>(
    &self,
    mut run: Run<T, R, E>,
    mut in_flight: S,
    policy: FailurePolicy,
  ) -> Result<Vec<Outcome<R, E>>, PoolError<E>>
  where
    S: InFlightSet<T, R, E>,
  {
    let run_id = run.run_id();
    let _registration = RunRegistration::new(run_id, run.total(), &self.active_runs, &self.active_task_info);
    let abort = self.options.abort_handle();
    info!(?policy, "Run started.");

    loop {
      if run.is_admitting() && abort.is_some_and(AbortHandle::is_aborted) {
        run.stop_admission();
        info!(admitted = run.admitted(), in_flight = run.in_flight(), "Abort observed. No further tasks will be admitted.");
        if policy == FailurePolicy::FailFast {
          return Err(PoolError::Aborted {
            admitted: run.admitted(),
          });
        }
      }

      while let Some((index, input)) = run.admit() {
        self.active_task_info.insert((run_id, index), Instant::now());
        debug!(index, in_flight = run.in_flight(), "Admitting task.");
        in_flight.launch(index, input);
      }
      self.peak_in_flight.fetch_max(run.high_water_mark(), AtomicOrdering::Relaxed);

      if run.is_finished() {
        break;
      }

      let settled = tokio::select! {
        biased;

        _ = wait_for_abort(abort), if run.is_admitting() => continue,

        settled = in_flight.next_settled() => settled,
      };

      let Some((index, outcome)) = settled else {
        error!(in_flight = run.in_flight(), "In-flight set closed before every admitted task settled.");
        return Err(PoolError::CompletionChannelClosed);
      };

      let elapsed = self
        .active_task_info
        .remove(&(run_id, index))
        .map(|(_, admitted_at)| admitted_at.elapsed())
        .unwrap_or_default();
      let status = TaskCompletionStatus::from(&outcome);
      match status {
        TaskCompletionStatus::Panicked => error!(index, "Task panicked during execution."),
        _ => debug!(index, ?status, ?elapsed, "Task settled."),
      }

      self.notifier.notify(TaskCompletionInfo {
        run_id,
        index,
        pool_name: self.pool_name.clone(),
        status,
        elapsed,
        completion_time: SystemTime::now(),
      });

      if policy == FailurePolicy::FailFast {
        if let Err(error) = outcome {
          run.stop_admission();
          warn!(
            index,
            admitted = run.admitted(),
            abandoned = run.in_flight() - 1,
            "Task failed. Failing fast; remaining in-flight tasks are abandoned."
          );
          return Err(PoolError::TaskFailed(TaskFailure { index, error }));
        }
      }

      if run.record(index, outcome).is_err() {
        error!(index, "Ignoring settlement for an index that is not in flight.");
      }
    }

    info!(
      admitted = run.admitted(),
      high_water_mark = run.high_water_mark(),
      "Run finished."
    );
    Ok(run.into_outcomes())
  }
}

/// Maps the bounded pool over `inputs` with fail-fast semantics.
///
/// Shorthand for `TaskPool::new(limit, "async_pool").run(inputs, executor)`.
pub async fn async_pool<T, R, E, F, Fut>(
  limit: usize,
  inputs: impl IntoIterator<Item = T>,
  executor: F,
) -> Result<Vec<R>, PoolError<E>>
where
  T: Send + 'static,
  F: Fn(T, usize) -> Fut + Send + Sync + 'static,
  Fut: IntoFuture<Output = Result<R, E>> + Send + 'static,
  Fut::IntoFuture: Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  TaskPool::new(limit, "async_pool").run(inputs, executor).await
}

fn into_values<R, E>(outcomes: Vec<Outcome<R, E>>) -> Result<Vec<R>, PoolError<E>> {
  outcomes
    .into_iter()
    .enumerate()
    .map(|(index, outcome)| outcome.map_err(|error| PoolError::TaskFailed(TaskFailure { index, error })))
    .collect()
}

async fn wait_for_abort(abort: Option<&AbortHandle>) {
  match abort {
    Some(handle) => handle.aborted().await,
    None => std::future::pending().await,
  }
}

/// Tracks a live run in the pool's maps and clears it when the run ends,
/// however it ends (including the run's future being dropped).
struct RunRegistration {
  run_id: u64,
  active_runs: Arc<DashMap<u64, usize>>,
  active_task_info: Arc<DashMap<(u64, usize), Instant>>,
}

impl RunRegistration {
  fn new(
    run_id: u64,
    total: usize,
    active_runs: &Arc<DashMap<u64, usize>>,
    active_task_info: &Arc<DashMap<(u64, usize), Instant>>,
  ) -> Self {
    active_runs.insert(run_id, total);
    Self {
      run_id,
      active_runs: active_runs.clone(),
      active_task_info: active_task_info.clone(),
    }
  }
}

impl Drop for RunRegistration {
  fn drop(&mut self) {
    self.active_runs.remove(&self.run_id);
    self.active_task_info.retain(|(run_id, _), _| *run_id != self.run_id);
    trace!(run_id = self.run_id, "Run deregistered from pool.");
  }
}
