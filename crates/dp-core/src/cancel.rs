//! Cooperative cancellation, threaded through every blocking wait.
//!
//! Grounded in the teacher framework's `TimeoutFuture` race between a target
//! future and a timer (`spark-hosting`'s graceful shutdown coordinator): here
//! the race is between the target future and a cancellation notification
//! instead of a timer, but the shape -- two futures, first one wins -- is the
//! same.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DpError, DpResult};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: tokio::sync::Notify,
}

/// A cloneable handle that can cancel one or more in-flight blocking waits.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<Inner>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled and wakes every waiter.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Races `fut` against cancellation. Returns `Err(DpError::Interrupted)` if
/// `token` fires first; passes `fut`'s own result through otherwise. With no
/// token, the wait is simply unconditional.
pub async fn cancellable<F>(token: Option<&CancelToken>, fut: F) -> DpResult<F::Output>
where
    F: std::future::Future,
{
    match token {
        None => Ok(fut.await),
        Some(token) => {
            if token.is_cancelled() {
                return Err(DpError::Interrupted);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(DpError::Interrupted),
                out = fut => Ok(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancels_before_future_resolves() {
        let token = CancelToken::new();
        token.cancel();
        let result = cancellable(Some(&token), async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        })
        .await;
        assert!(matches!(result, Err(DpError::Interrupted)));
    }

    #[tokio::test]
    async fn passes_through_without_a_token() {
        let result = cancellable(None::<&CancelToken>, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
