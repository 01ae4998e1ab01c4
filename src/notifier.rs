use crate::error::TaskError;
use crate::task::Outcome;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, error, info, trace};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Panicked,
  TimedOut,
}

impl<R, E> From<&Outcome<R, E>> for TaskCompletionStatus {
  fn from(outcome: &Outcome<R, E>) -> Self {
    match outcome {
      Ok(_) => TaskCompletionStatus::Success,
      Err(TaskError::Panicked) => TaskCompletionStatus::Panicked,
      Err(TaskError::TimedOut(_)) => TaskCompletionStatus::TimedOut,
      Err(TaskError::Failed(_)) | Err(TaskError::NotAdmitted) => TaskCompletionStatus::Failed,
    }
  }
}

/// Describes one settlement observed by a run.
#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub run_id: u64,
  /// Position of the input in the run's input sequence.
  pub index: usize,
  pub pool_name: Arc<String>,
  pub status: TaskCompletionStatus,
  /// Time between admission and settlement being observed.
  pub elapsed: Duration,
  pub completion_time: SystemTime,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

/// Fans settlement events out to registered handlers.
///
/// Handlers run synchronously on the dispatch loop that observed the settlement,
/// so they should be quick. A panicking handler is logged and skipped.
#[derive(Clone, Default)]
pub(crate) struct CompletionNotifier {
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &self.handler_count())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn add_handler(&self, pool_name: &str, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(%pool_name, "Notifier: Added new completion handler. Total handlers: {}", handlers_guard.len());
  }

  pub(crate) fn handler_count(&self) -> usize {
    self.handlers.read().len()
  }

  pub(crate) fn notify(&self, info: TaskCompletionInfo) {
    // Snapshot so a handler may register further handlers without deadlocking.
    let handlers: Vec<CompletionHandler> = self.handlers.read().clone();
    if handlers.is_empty() {
      trace!(run_id = info.run_id, index = info.index, "No completion handlers registered, dropping notification.");
      return;
    }

    debug!(
      run_id = info.run_id,
      index = info.index,
      status = ?info.status,
      "Dispatching notification to {} handlers.",
      handlers.len()
    );

    for handler in handlers {
      let info_for_handler = info.clone();
      let result = catch_unwind(AssertUnwindSafe(|| handler(info_for_handler)));
      if result.is_err() {
        error!(
          "A completion handler panicked during execution. Pool: {}, Run ID: {}, Index: {}",
          info.pool_name, info.run_id, info.index
        );
      }
    }
  }
}
