use crate::handle::AbortHandle;

use std::time::Duration;

/// What a run does when an execution fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
  /// The first failure ends the run and is returned as `PoolError::TaskFailed`.
  /// Nothing else is admitted and later settlements are ignored.
  #[default]
  FailFast,
  /// Every input is executed and each index reports its own outcome.
  CollectAll,
}

/// Per-run knobs shared by every run of a `TaskPool`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  task_timeout: Option<Duration>,
  abort: Option<AbortHandle>,
}

impl RunOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Settles any execution still pending after `timeout` as `TaskError::TimedOut`.
  pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
    self.task_timeout = Some(timeout);
    self
  }

  /// Stops admission of further inputs once `handle` is aborted.
  pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
    self.abort = Some(handle);
    self
  }

  pub fn task_timeout(&self) -> Option<Duration> {
    self.task_timeout
  }

  pub fn abort_handle(&self) -> Option<&AbortHandle> {
    self.abort.as_ref()
  }
}
