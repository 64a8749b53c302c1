use std::sync::Arc;

use tfprep_domain::ResourceIdentity;
use tfprep_driver::{ExistenceOutcome, Provider};
use tracing::{debug, info, Instrument, Span};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;

/// Answers "does it already exist". Only `Ok(false)` may lead to a create.
#[derive(Clone)]
pub struct ExistenceProber {
    provider: Arc<dyn Provider>,
    cancel: CancelToken,
    span: Span,
}

impl ExistenceProber {
    pub fn new(provider: Arc<dyn Provider>, cancel: CancelToken, span: Span) -> Self {
        Self { provider, cancel, span }
    }

    pub async fn exists(&self, identity: &ResourceIdentity) -> Result<bool, ReconcileError> {
        let outcome = self
            .cancel
            .run("probe", self.provider.probe(identity))
            .instrument(self.span.clone())
            .await?;

        match outcome {
            ExistenceOutcome::Exists => {
                info!(parent: &self.span, resource = %identity, "already exists");
                Ok(true)
            }
            ExistenceOutcome::NotFound => {
                debug!(parent: &self.span, resource = %identity, "not found");
                Ok(false)
            }
            ExistenceOutcome::TransportError(e) => Err(ReconcileError::transport("probe", identity, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfprep_domain::ResourceKind;
    use tfprep_driver::InMemoryProvider;

    fn prober(provider: InMemoryProvider) -> ExistenceProber {
        ExistenceProber::new(Arc::new(provider), CancelToken::never(), Span::none())
    }

    #[tokio::test]
    async fn existing_and_missing_resources() {
        let rg = ResourceIdentity::resource_group("rg");
        let p = prober(InMemoryProvider::new().with_existing(&rg));
        assert!(p.exists(&rg).await.unwrap());
        assert!(!p.exists(&ResourceIdentity::resource_group("other")).await.unwrap());
    }

    #[tokio::test]
    async fn transport_errors_are_fatal_not_missing() {
        let p = prober(InMemoryProvider::new().fail_probe(ResourceKind::KeyVault));
        let err = p.exists(&ResourceIdentity::key_vault("rg", "kv")).await.unwrap_err();
        match err {
            ReconcileError::Transport { operation, resource, .. } => {
                assert_eq!(operation, "probe");
                assert!(resource.contains("kv"), "got: {}", resource);
            }
            other => panic!("expected transport error, got {other}"),
        }
    }
}
