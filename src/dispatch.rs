use crate::task::{settle, InFlightTask, Outcome};

use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use fibre::mpsc::{self, UnboundedAsyncReceiver as AsyncReceiver, UnboundedAsyncSender as AsyncSender};
use futures::stream::FuturesUnordered;
use futures_util::stream::StreamExt;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug_span, trace, Instrument};

/// The set of admitted-but-unsettled executions of one run.
///
/// `launch` is synchronous bookkeeping. `next_settled` is the only suspension
/// point of a run: it waits for whichever in-flight execution settles first.
pub(crate) trait InFlightSet<T, R, E> {
  fn launch(&mut self, index: usize, input: T);

  /// `None` means no settlement can arrive any more.
  async fn next_settled(&mut self) -> Option<(usize, Outcome<R, E>)>;
}

/// Executions polled directly by the run's dispatch loop.
///
/// Nothing is spawned, so no `Send` or `'static` bounds apply. Dropping the set
/// drops every unsettled execution with it; only `run_local*` uses this.
pub(crate) struct LocalInFlight<'a, F, R, E> {
  executor: &'a F,
  timeout: Option<Duration>,
  tasks: FuturesUnordered<InFlightTask<'a, R, E>>,
}

impl<'a, F, R, E> LocalInFlight<'a, F, R, E> {
  pub(crate) fn new(executor: &'a F, timeout: Option<Duration>) -> Self {
    Self {
      executor,
      timeout,
      tasks: FuturesUnordered::new(),
    }
  }
}

impl<'a, T, F, Fut, R, E> InFlightSet<T, R, E> for LocalInFlight<'a, F, R, E>
where
  F: Fn(T, usize) -> Fut,
  Fut: IntoFuture<Output = Result<R, E>> + 'a,
  Fut::IntoFuture: 'a,
  T: 'a,
  R: 'a,
  E: 'a,
{
  fn launch(&mut self, index: usize, input: T) {
    let executor = self.executor;
    let timeout = self.timeout;
    self.tasks.push(Box::pin(async move {
      let outcome = settle(async move { executor(input, index).await }, timeout).await;
      (index, outcome)
    }));
  }

  async fn next_settled(&mut self) -> Option<(usize, Outcome<R, E>)> {
    self.tasks.next().await
  }
}

struct Completion<R, E> {
  index: usize,
  outcome: Outcome<R, E>,
}

/// Executions spawned onto a Tokio runtime, reporting back over a channel.
///
/// Once the run stops listening (the set is dropped), executions that are still
/// running carry on to settlement and their reports are discarded.
pub(crate) struct SpawnedInFlight<F, R: Send, E: Send> {
  executor: Arc<F>,
  timeout: Option<Duration>,
  runtime: TokioHandle,
  run_id: u64,
  completions_tx: AsyncSender<Completion<R, E>>,
  completions_rx: AsyncReceiver<Completion<R, E>>,
}

impl<F, R: Send, E: Send> fmt::Debug for SpawnedInFlight<F, R, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SpawnedInFlight")
      .field("run_id", &self.run_id)
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}

impl<F, R: Send, E: Send> SpawnedInFlight<F, R, E> {
  pub(crate) fn new(executor: F, timeout: Option<Duration>, runtime: TokioHandle, run_id: u64) -> Self {
    let (completions_tx, completions_rx) = mpsc::unbounded_async();
    Self {
      executor: Arc::new(executor),
      timeout,
      runtime,
      run_id,
      completions_tx,
      completions_rx,
    }
  }
}

impl<T, F, Fut, R, E> InFlightSet<T, R, E> for SpawnedInFlight<F, R, E>
where
  T: Send + 'static,
  F: Fn(T, usize) -> Fut + Send + Sync + 'static,
  Fut: IntoFuture<Output = Result<R, E>> + Send + 'static,
  Fut::IntoFuture: Send + 'static,
  R: Send + 'static,
  E: Send + 'static,
{
  fn launch(&mut self, index: usize, input: T) {
    let executor = self.executor.clone();
    let timeout = self.timeout;
    let mut completions_tx = self.completions_tx.clone();
    let run_id = self.run_id;

    self.runtime.spawn(
      async move {
        let outcome = settle(async move { executor(input, index).await }, timeout).await;
        if completions_tx.send(Completion { index, outcome }).await.is_err() {
          trace!(run_id, index, "Run is no longer listening. Discarding settlement of abandoned task.");
        }
      }
      .instrument(debug_span!("pool_task", run_id, index)),
    );
  }

  async fn next_settled(&mut self) -> Option<(usize, Outcome<R, E>)> {
    match self.completions_rx.recv().await {
      Ok(completion) => Some((completion.index, completion.outcome)),
      Err(_) => None,
    }
  }
}
