use std::sync::Arc;

use tfprep_domain::{LockScope, ResourceIdentity};
use tfprep_driver::Provider;
use tracing::{info, Instrument, Span};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;
use crate::prober::ExistenceProber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Present,
    Created,
}

/// Attaches `CanNotDelete` locks at resource scope.
pub struct LockManager {
    provider: Arc<dyn Provider>,
    prober: ExistenceProber,
    cancel: CancelToken,
    span: Span,
    notes: String,
}

impl LockManager {
    pub fn new(provider: Arc<dyn Provider>, cancel: CancelToken, span: Span, notes: impl Into<String>) -> Self {
        let prober = ExistenceProber::new(provider.clone(), cancel.clone(), span.clone());
        Self { provider, prober, cancel, span, notes: notes.into() }
    }

    /// Returns the lock identity alongside the outcome.
    pub async fn ensure_lock(
        &self,
        scope: &LockScope,
        lock_name: &str,
    ) -> Result<(ResourceIdentity, LockOutcome), ReconcileError> {
        let lock = ResourceIdentity::resource_lock(scope.clone(), lock_name);
        if self.prober.exists(&lock).await? {
            return Ok((lock, LockOutcome::Present));
        }

        self.cancel
            .run("create-lock", self.provider.create_lock(&lock, &self.notes))
            .instrument(self.span.clone())
            .await?
            .map_err(|e| ReconcileError::transport("create-lock", &lock, e))?;
        info!(parent: &self.span, resource = %lock, "resource lock created");
        Ok((lock, LockOutcome::Created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfprep_domain::ResourceKind;
    use tfprep_driver::InMemoryProvider;

    fn vault_scope() -> LockScope {
        LockScope::for_resource(&ResourceIdentity::key_vault("rg", "kv-tfstate")).unwrap()
    }

    fn manager(provider: Arc<InMemoryProvider>) -> LockManager {
        LockManager::new(provider, CancelToken::never(), Span::none(), "CanNotDelete")
    }

    #[tokio::test]
    async fn missing_lock_is_created_once() {
        let provider = Arc::new(InMemoryProvider::new());
        let m = manager(provider.clone());

        let (lock, first) = m.ensure_lock(&vault_scope(), "DoNotDelete").await.unwrap();
        assert_eq!(first, LockOutcome::Created);
        assert_eq!(lock.name, "DoNotDelete");

        let (_, second) = m.ensure_lock(&vault_scope(), "DoNotDelete").await.unwrap();
        assert_eq!(second, LockOutcome::Present);
        assert_eq!(provider.create_calls_for(ResourceKind::ResourceLock), 1);
    }

    #[tokio::test]
    async fn failed_lock_read_is_fatal() {
        let provider = Arc::new(InMemoryProvider::new().fail_probe(ResourceKind::ResourceLock));
        let err = manager(provider.clone())
            .ensure_lock(&vault_scope(), "DoNotDelete")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { operation: "probe", .. }), "got: {err}");
        assert_eq!(provider.create_calls(), 0);
    }
}
