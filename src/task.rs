use crate::error::TaskError;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;

use futures::FutureExt;

/// The settled result of one input: its value, or why it has none.
pub type Outcome<R, E> = Result<R, TaskError<E>>;

/// A boxed execution as held in the in-flight set, tagged with its input index.
pub(crate) type InFlightTask<'a, R, E> = Pin<Box<dyn Future<Output = (usize, Outcome<R, E>)> + 'a>>;

/// Drives one execution to settlement.
///
/// Panics (including ones raised while the executor is being *called*, since the
/// call happens inside `execution`) become `TaskError::Panicked`. With a timeout,
/// an execution that has not settled in time is dropped and reported as
/// `TaskError::TimedOut`.
pub(crate) async fn settle<Fut, R, E>(execution: Fut, timeout: Option<Duration>) -> Outcome<R, E>
where
  Fut: Future<Output = Result<R, E>>,
{
  let guarded = AssertUnwindSafe(execution).catch_unwind();

  let caught = match timeout {
    Some(limit) => match tokio::time::timeout(limit, guarded).await {
      Ok(caught) => caught,
      Err(_elapsed) => return Err(TaskError::TimedOut(limit)),
    },
    None => guarded.await,
  };

  match caught {
    Ok(Ok(value)) => Ok(value),
    Ok(Err(e)) => Err(TaskError::Failed(e)),
    Err(_panic_payload) => Err(TaskError::Panicked),
  }
}
