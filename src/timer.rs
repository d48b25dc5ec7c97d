//! Cancellable delays used to pace the turn-taking cycle.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` when the full delay elapsed and `false` when it was cancelled.
pub async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Deliver `event` on `tx` once `duration` has elapsed, unless cancelled first.
pub fn schedule<T>(
    duration: Duration,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<T>,
    event: T,
) -> JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        if wait(duration, &cancel).await {
            // The receiver is gone only when the controller has shut down
            let _ = tx.send(event);
        }
    })
}

/// A single pending delay that is replaced whenever a new one is armed.
#[derive(Debug)]
pub struct PendingTimer {
    parent: CancellationToken,
    current: Option<CancellationToken>,
}

impl PendingTimer {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            current: None,
        }
    }

    /// Cancel any pending delay and arm a new one delivering `event`.
    pub fn arm<T>(&mut self, duration: Duration, tx: mpsc::UnboundedSender<T>, event: T)
    where
        T: Send + 'static,
    {
        self.cancel();
        let token = self.parent.child_token();
        schedule(duration, token.clone(), tx, event);
        self.current = Some(token);
    }

    /// Cancel the pending delay, if any. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
