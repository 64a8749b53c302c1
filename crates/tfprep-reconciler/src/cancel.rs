//! A single cancellation signal threaded through a provisioning run.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::ReconcileError;

/// Owner side; dropping it without calling [`CancelHandle::cancel`] never cancels.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // No receivers left means nothing is running; nothing to do.
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { rx: self.tx.subscribe() }
    }
}

impl CancelToken {
    /// A token nobody can fire.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires; pends forever if it never can.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` unless cancellation fires first.
    pub async fn run<F, T>(&self, operation: &'static str, fut: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(ReconcileError::Cancelled { operation });
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ReconcileError::Cancelled { operation }),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the run is cancelled.
    pub async fn sleep(&self, operation: &'static str, duration: Duration) -> Result<(), ReconcileError> {
        self.run(operation, tokio::time::sleep(duration)).await
    }
}
