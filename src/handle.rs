use tokio_util::sync::CancellationToken;

/// An external abort signal for one or more runs.
///
/// Aborting stops admission only. Executions that were already admitted are not
/// interrupted by the pool; an executor that wants to stop early can watch
/// `AbortHandle::token()` itself.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
  token: CancellationToken,
}

impl AbortHandle {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wraps an existing token, e.g. a child of an application-wide shutdown token.
  pub fn from_token(token: CancellationToken) -> Self {
    Self { token }
  }

  /// Requests that every run observing this handle stop admitting inputs.
  pub fn abort(&self) {
    tracing::debug!("AbortHandle: Abort requested.");
    self.token.cancel();
  }

  pub fn is_aborted(&self) -> bool {
    self.token.is_cancelled()
  }

  /// The underlying token, for executors that cooperate with the abort.
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) async fn aborted(&self) {
    self.token.cancelled().await
  }
}
