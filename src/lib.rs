//! A Tokio-based bounded-concurrency pool that maps an async function over an
//! ordered list of inputs, keeping at most `limit` executions in flight and
//! returning results in input order.

mod dispatch;
mod error;
mod handle;
mod notifier;
mod options;
mod pool;
mod run;
mod task;

pub use error::{PoolError, TaskError, TaskFailure};
pub use handle::AbortHandle;
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use options::{FailurePolicy, RunOptions};
pub use pool::{async_pool, TaskPool};
pub use task::Outcome;
