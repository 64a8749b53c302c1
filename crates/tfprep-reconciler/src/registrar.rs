use std::sync::Arc;
use std::time::Duration;

use tfprep_domain::RegistrationState;
use tfprep_driver::Provider;
use tracing::{info, warn, Instrument, Span};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    AlreadyRegistered,
    /// `retries` counts the backoff sleeps taken before the namespace read as registered.
    Registered { retries: u32 },
}

/// Makes sure a provider namespace is registered in the subscription.
///
/// After the register call the state is re-read up to `max_retries` times;
/// the i-th read that still says `Registering` is followed by a sleep of
/// `i * backoff_step`.
pub struct ProviderRegistrar {
    provider: Arc<dyn Provider>,
    cancel: CancelToken,
    span: Span,
    max_retries: u32,
    backoff_step: Duration,
}

impl ProviderRegistrar {
    pub fn new(
        provider: Arc<dyn Provider>,
        cancel: CancelToken,
        span: Span,
        max_retries: u32,
        backoff_step: Duration,
    ) -> Self {
        Self { provider, cancel, span, max_retries, backoff_step }
    }

    async fn read(&self, namespace: &str) -> Result<RegistrationState, ReconcileError> {
        self.cancel
            .run("registration-state", self.provider.registration_state(namespace))
            .await?
            .map_err(|e| ReconcileError::transport("registration-state", namespace, e))
    }

    pub async fn ensure_registered(&self, namespace: &str) -> Result<RegistrationOutcome, ReconcileError> {
        self.ensure_registered_inner(namespace)
            .instrument(self.span.clone())
            .await
    }

    async fn ensure_registered_inner(&self, namespace: &str) -> Result<RegistrationOutcome, ReconcileError> {
        if self.read(namespace).await? == RegistrationState::Registered {
            info!(namespace, "resource provider already registered");
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let state = self
            .cancel
            .run("register", self.provider.register_provider(namespace))
            .await?
            .map_err(|e| ReconcileError::transport("register", namespace, e))?;
        info!(namespace, state = %state, "registering resource provider");
        if state == RegistrationState::Registered {
            return Ok(RegistrationOutcome::Registered { retries: 0 });
        }

        let mut last = state;
        for retry in 1..=self.max_retries {
            last = self.read(namespace).await?;
            match &last {
                RegistrationState::Registered => {
                    info!(namespace, retries = retry - 1, "resource provider registered");
                    return Ok(RegistrationOutcome::Registered { retries: retry - 1 });
                }
                RegistrationState::Registering => {}
                other => {
                    warn!(namespace, state = %other, "resource provider in unknown registration state");
                    return Err(ReconcileError::UnknownRegistrationState {
                        namespace: namespace.to_string(),
                        state: other.to_string(),
                    });
                }
            }

            info!(namespace, state = %last, retry, "waiting for resource provider registration");
            self.cancel
                .sleep("registration-backoff", self.backoff_step * retry)
                .await?;
        }

        warn!(namespace, state = %last, "resource provider registration did not complete");
        Err(ReconcileError::RegistrationTimeout {
            namespace: namespace.to_string(),
            retries: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfprep_driver::InMemoryProvider;

    use crate::cancel::cancel_pair;

    const NS: &str = "Microsoft.Storage";
    const STEP: Duration = Duration::from_millis(1);

    fn registrar(provider: Arc<InMemoryProvider>, cancel: CancelToken, step: Duration) -> ProviderRegistrar {
        ProviderRegistrar::new(provider, cancel, Span::none(), 9, step)
    }

    fn scripted(polls: Vec<RegistrationState>) -> Arc<InMemoryProvider> {
        Arc::new(InMemoryProvider::new().with_registration(
            NS,
            RegistrationState::NotRegistered,
            RegistrationState::Registering,
            polls,
        ))
    }

    #[tokio::test]
    async fn already_registered_skips_register_call() {
        let provider = Arc::new(InMemoryProvider::new());
        let out = registrar(provider.clone(), CancelToken::never(), STEP)
            .ensure_registered(NS)
            .await
            .unwrap();
        assert_eq!(out, RegistrationOutcome::AlreadyRegistered);
        assert!(!provider.calls().iter().any(|c| c.starts_with("register ")));
    }

    #[tokio::test]
    async fn succeeds_after_three_retries() {
        use RegistrationState::*;
        let provider = scripted(vec![Registering, Registering, Registering, Registered]);
        let out = registrar(provider.clone(), CancelToken::never(), STEP)
            .ensure_registered(NS)
            .await
            .unwrap();
        assert_eq!(out, RegistrationOutcome::Registered { retries: 3 });
        // initial read + four re-reads
        assert_eq!(provider.registration_reads(), 5);
    }

    #[tokio::test]
    async fn stuck_registration_times_out_after_nine_retries() {
        let provider = scripted(vec![RegistrationState::Registering]);
        let err = registrar(provider.clone(), CancelToken::never(), STEP)
            .ensure_registered(NS)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ReconcileError::RegistrationTimeout { retries: 9, .. }),
            "got: {err}"
        );
        assert_eq!(provider.registration_reads(), 10);
    }

    #[tokio::test]
    async fn unknown_state_fails_without_retrying() {
        let provider = scripted(vec![RegistrationState::Unknown("Unregistering".into())]);
        let err = registrar(provider.clone(), CancelToken::never(), STEP)
            .ensure_registered(NS)
            .await
            .unwrap_err();
        match err {
            ReconcileError::UnknownRegistrationState { state, .. } => assert_eq!(state, "Unregistering"),
            other => panic!("expected unknown state, got {other}"),
        }
        assert_eq!(provider.registration_reads(), 2);
    }

    #[tokio::test]
    async fn immediate_registration_needs_no_polling() {
        let provider = Arc::new(InMemoryProvider::new().with_registration(
            NS,
            RegistrationState::NotRegistered,
            RegistrationState::Registered,
            Vec::new(),
        ));
        let out = registrar(provider.clone(), CancelToken::never(), STEP)
            .ensure_registered(NS)
            .await
            .unwrap();
        assert_eq!(out, RegistrationOutcome::Registered { retries: 0 });
        assert_eq!(provider.registration_reads(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let provider = scripted(vec![RegistrationState::Registering]);
        let (handle, token) = cancel_pair();
        let registrar = registrar(provider, token, Duration::from_secs(30));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), registrar.ensure_registered(NS))
            .await
            .expect("registrar should stop promptly once cancelled");
        assert!(res.unwrap_err().is_cancelled());
    }
}
