use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Cooperative cancellation flag shared between a controller and a running session.
///
/// Clones observe the same flag. Triggering is idempotent and may happen from
/// any thread, before the session starts consuming or after it has finished.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancellationToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token has been triggered.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// True when both handles are clones of the same token.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
