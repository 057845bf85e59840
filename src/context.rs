use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

/// Per-request cancellation scope handed to every store call
///
/// Reads race against cancellation and the deadline. Writes only check the
/// scope before they start and then run to completion, so a cancelled request
/// never leaves half a write behind.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Context without a deadline
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derives a context that is also cancelled when `parent` is
    pub fn child_of(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails with `Cancelled` once the scope is cancelled or past its deadline
    pub fn ensure_active(&self, operation: &str) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled(format!("{} cancelled by caller", operation)));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(AppError::Cancelled(format!("{} exceeded its deadline", operation)));
        }
        Ok(())
    }

    /// Runs a read against the store, abandoning it on cancellation or timeout
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        self.ensure_active(operation)?;

        let guarded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| {
                        AppError::Cancelled(format!("{} exceeded its deadline", operation))
                    })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(operation, "Store call cancelled");
                Err(AppError::Cancelled(format!("{} cancelled by caller", operation)))
            }
            result = guarded => result.map_err(|e| e.at_store_boundary(operation)),
        }
    }

    /// Runs a single atomic write; cancellation is only honoured before it starts
    pub async fn commit<T, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        self.ensure_active(operation)?;
        fut.await.map_err(|e| e.at_store_boundary(operation))
    }
}
