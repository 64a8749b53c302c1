use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tfprep_driver::{OperationHandle, OperationStatus, Provider};
use tracing::{debug, info, Instrument, Span};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;

/// Polls a long-running create at a fixed interval until it is terminal.
///
/// There is no poll cap; the wait ends on a terminal status, on the first
/// failed status query, or on cancellation.
pub struct OperationPoller {
    provider: Arc<dyn Provider>,
    cancel: CancelToken,
    span: Span,
}

impl OperationPoller {
    pub fn new(provider: Arc<dyn Provider>, cancel: CancelToken, span: Span) -> Self {
        Self { provider, cancel, span }
    }

    /// Returns the created resource's representation on success.
    pub async fn await_terminal(
        &self,
        handle: &OperationHandle,
        interval: Duration,
    ) -> Result<Value, ReconcileError> {
        self.poll_loop(handle, interval)
            .instrument(self.span.clone())
            .await
    }

    async fn poll_loop(&self, handle: &OperationHandle, interval: Duration) -> Result<Value, ReconcileError> {
        let mut polls: u32 = 0;
        loop {
            let status = self
                .cancel
                .run("operation-status", self.provider.operation_status(handle))
                .await?
                .map_err(|e| ReconcileError::transport("operation-status", &handle.resource, e))?;

            match status {
                OperationStatus::Succeeded(body) => {
                    debug!(resource = %handle.resource, polls, "operation succeeded");
                    return Ok(body);
                }
                OperationStatus::Failed(detail) => {
                    return Err(ReconcileError::OperationFailed {
                        operation: "create",
                        resource: handle.resource.to_string(),
                        detail,
                    });
                }
                OperationStatus::InProgress => {}
            }

            polls += 1;
            if polls % 10 == 0 {
                info!(resource = %handle.resource, polls, "still waiting for operation");
            } else {
                debug!(resource = %handle.resource, polls, ?interval, "operation in progress");
            }
            self.cancel.sleep("operation-wait", interval).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfprep_domain::{ResourceIdentity, ResourceKind};
    use tfprep_driver::InMemoryProvider;

    use crate::cancel::cancel_pair;

    fn account() -> ResourceIdentity {
        ResourceIdentity::storage_account("rg", "satfstate")
    }

    async fn begin(provider: &InMemoryProvider) -> OperationHandle {
        provider
            .begin_create_storage_account(&account(), "westeurope")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn waits_until_succeeded() {
        let provider = Arc::new(InMemoryProvider::new().with_operation_polls(3));
        let handle = begin(&provider).await;
        let poller = OperationPoller::new(provider.clone(), CancelToken::never(), Span::none());

        let body = poller.await_terminal(&handle, Duration::from_millis(1)).await.unwrap();
        assert_eq!(body["name"], "satfstate");
        assert!(provider.exists(&account()));
        let status_calls = provider
            .calls()
            .iter()
            .filter(|c| c.starts_with("operation-status"))
            .count();
        assert_eq!(status_calls, 4);
    }

    #[tokio::test]
    async fn failed_operation_carries_detail() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_operation_polls(1)
                .fail_operation(ResourceKind::StorageAccount, "QuotaExceeded"),
        );
        let handle = begin(&provider).await;
        let poller = OperationPoller::new(provider, CancelToken::never(), Span::none());

        match poller.await_terminal(&handle, Duration::from_millis(1)).await {
            Err(ReconcileError::OperationFailed { detail, .. }) => assert_eq!(detail, "QuotaExceeded"),
            other => panic!("expected operation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_handle_needs_no_wait() {
        let provider = Arc::new(InMemoryProvider::new());
        let handle = begin(&provider).await;
        assert!(handle.completed.is_some());
        let poller = OperationPoller::new(provider, CancelToken::never(), Span::none());
        assert!(poller.await_terminal(&handle, Duration::from_secs(30)).await.is_ok());
    }

    #[tokio::test]
    async fn cancellation_mid_poll_returns_promptly() {
        let provider = Arc::new(InMemoryProvider::new().with_operation_polls(u32::MAX));
        let handle = begin(&provider).await;
        let (cancel, token) = cancel_pair();
        let poller = OperationPoller::new(provider, token, Span::none());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let res = tokio::time::timeout(
            Duration::from_secs(5),
            poller.await_terminal(&handle, Duration::from_secs(30)),
        )
        .await
        .expect("poller should stop well before the 30s interval");
        assert!(matches!(res, Err(ReconcileError::Cancelled { .. })), "got: {res:?}");
    }
}
