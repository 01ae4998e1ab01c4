use std::time::Duration;

use thiserror::Error;

/// Why a single admitted execution did not produce a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
  #[error("Task executor returned an error: {0}")]
  Failed(E),

  #[error("Task executor panicked")]
  Panicked,

  #[error("Task did not settle within {0:?}")]
  TimedOut(Duration),

  /// The run stopped admitting (abort) before this input was started.
  #[error("Task was never admitted because the run was aborted")]
  NotAdmitted,
}

impl<E> TaskError<E> {
  /// Returns the executor's own error, if that is what this failure carries.
  pub fn into_failed(self) -> Option<E> {
    match self {
      TaskError::Failed(e) => Some(e),
      _ => None,
    }
  }
}

/// A failed execution together with the index of the input it was processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task at index {index} failed: {error}")]
pub struct TaskFailure<E> {
  pub index: usize,
  pub error: TaskError<E>,
}

/// Errors that can occur when running inputs through a `TaskPool`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError<E> {
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),

  /// The first failure observed by a fail-fast run. Later settlements are discarded.
  #[error("Run failed fast: {0}")]
  TaskFailed(TaskFailure<E>),

  #[error("Run was aborted after admitting {admitted} task(s)")]
  Aborted { admitted: usize },

  #[error("Completion channel closed while tasks were still in flight")]
  CompletionChannelClosed,

  #[error("No Tokio runtime available to spawn tasks on")]
  NoRuntime,
}

impl<E> PoolError<E> {
  /// The failing index when this error came from an executor.
  pub fn failed_index(&self) -> Option<usize> {
    match self {
      PoolError::TaskFailed(failure) => Some(failure.index),
      _ => None,
    }
  }
}
