use std::sync::Arc;

use tfprep_config::Tuning;
use tfprep_domain::{validate_request, LockScope, PermissionSet, ProvisioningRequest, ResourceIdentity};
use tfprep_driver::{IdentityLookup, Provider};
use tracing::{info, info_span, Instrument, Span};

use crate::access_policy::{effective_principal, AccessPolicyReconciler, PolicyOutcome};
use crate::cancel::CancelToken;
use crate::error::ReconcileError;
use crate::lock::{LockManager, LockOutcome};
use crate::poller::OperationPoller;
use crate::prober::ExistenceProber;
use crate::registrar::{ProviderRegistrar, RegistrationOutcome};
use crate::report::{Change, ProvisionReport};

const STORAGE_NAMESPACE: &str = "Microsoft.Storage";

/// Provisions the state backend in a fixed order and stops at the first error.
///
/// 1. validate the request
/// 2. resource group
/// 3. storage account (provider registration, name check, create, poll)
/// 4. storage account lock, when locks are enabled
/// 5. blob container
/// 6. key vault (name check, create, poll)
/// 7. key vault lock, when locks are enabled
/// 8. access policy for the effective principal
/// 9. vault key
///
/// Nothing created by earlier steps is rolled back; re-running the same
/// request is the recovery path.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    identity: Arc<dyn IdentityLookup>,
    tuning: Tuning,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        identity: Arc<dyn IdentityLookup>,
        tuning: Tuning,
        cancel: CancelToken,
    ) -> Self {
        Self { provider, identity, tuning, cancel }
    }

    pub async fn run(&self, request: &ProvisioningRequest) -> Result<ProvisionReport, ReconcileError> {
        validate_request(request)?;

        let span = info_span!(
            "provision",
            provider = self.provider.name(),
            subscription = %request.subscription_id,
            resource_group = %request.resource_group_name
        );
        Run::new(self, request, span.clone())
            .execute()
            .instrument(span)
            .await
    }
}

/// State of one provisioning run.
struct Run<'a> {
    req: &'a ProvisioningRequest,
    tuning: &'a Tuning,
    provider: &'a Arc<dyn Provider>,
    identity: &'a dyn IdentityLookup,
    cancel: &'a CancelToken,
    prober: ExistenceProber,
    registrar: ProviderRegistrar,
    poller: OperationPoller,
    policies: AccessPolicyReconciler,
    locks: LockManager,
    report: ProvisionReport,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, req: &'a ProvisioningRequest, span: Span) -> Self {
        let provider = &orchestrator.provider;
        let cancel = &orchestrator.cancel;
        let tuning = &orchestrator.tuning;
        Self {
            req,
            tuning,
            provider,
            identity: orchestrator.identity.as_ref(),
            cancel,
            prober: ExistenceProber::new(provider.clone(), cancel.clone(), span.clone()),
            registrar: ProviderRegistrar::new(
                provider.clone(),
                cancel.clone(),
                span.clone(),
                tuning.registration_max_retries,
                tuning.registration_backoff_step,
            ),
            poller: OperationPoller::new(provider.clone(), cancel.clone(), span.clone()),
            policies: AccessPolicyReconciler::new(provider.clone(), cancel.clone(), span.clone()),
            locks: LockManager::new(provider.clone(), cancel.clone(), span, tuning.lock_notes.clone()),
            report: ProvisionReport::new(),
        }
    }

    async fn execute(mut self) -> Result<ProvisionReport, ReconcileError> {
        info!(locks = self.req.resource_locks, "provisioning state backend");

        self.resource_group().await?;

        let account = self.req.storage_account();
        self.storage_account(&account).await?;
        if self.req.resource_locks {
            self.lock(&account).await?;
        }

        self.blob_container().await?;

        let vault = self.req.key_vault();
        self.key_vault(&vault).await?;
        if self.req.resource_locks {
            self.lock(&vault).await?;
        }

        self.access_policy(&vault).await?;
        self.key().await?;

        let report = self.report.finish();
        info!(created = report.created(), noop = report.is_noop(), "state backend ready");
        Ok(report)
    }

    fn existing(&mut self, resource: ResourceIdentity) {
        self.report.changes.push(Change::AlreadyExists { resource });
    }

    fn created(&mut self, resource: ResourceIdentity) {
        info!(resource = %resource, "created");
        self.report.changes.push(Change::Created { resource });
    }

    // ── Steps ─────────────────────────────────────────────────────────────────

    async fn resource_group(&mut self) -> Result<(), ReconcileError> {
        let rg = self.req.resource_group();
        if self.prober.exists(&rg).await? {
            self.existing(rg);
            return Ok(());
        }

        self.cancel
            .run(
                "create-resource-group",
                self.provider
                    .create_resource_group(&self.req.resource_group_name, &self.req.resource_group_location),
            )
            .await?
            .map_err(|e| ReconcileError::transport("create-resource-group", &rg, e))?;
        self.created(rg);
        Ok(())
    }

    async fn storage_account(&mut self, account: &ResourceIdentity) -> Result<(), ReconcileError> {
        if self.prober.exists(account).await? {
            self.existing(account.clone());
            return Ok(());
        }

        if let RegistrationOutcome::Registered { retries } =
            self.registrar.ensure_registered(STORAGE_NAMESPACE).await?
        {
            self.report.changes.push(Change::ProviderRegistered {
                namespace: STORAGE_NAMESPACE.to_string(),
                retries,
            });
        }
        self.ensure_name_available(account).await?;

        let handle = self
            .cancel
            .run(
                "create-storage-account",
                self.provider
                    .begin_create_storage_account(account, &self.req.resource_group_location),
            )
            .await?
            .map_err(|e| ReconcileError::transport("create-storage-account", account, e))?;
        self.poller
            .await_terminal(&handle, self.tuning.storage_account_poll_interval)
            .await?;
        self.created(account.clone());
        Ok(())
    }

    async fn blob_container(&mut self) -> Result<(), ReconcileError> {
        let container = self.req.blob_container();
        if self.prober.exists(&container).await? {
            self.existing(container);
            return Ok(());
        }

        self.cancel
            .run("create-blob-container", self.provider.create_blob_container(&container))
            .await?
            .map_err(|e| ReconcileError::transport("create-blob-container", &container, e))?;
        self.created(container);
        Ok(())
    }

    async fn key_vault(&mut self, vault: &ResourceIdentity) -> Result<(), ReconcileError> {
        if self.prober.exists(vault).await? {
            self.existing(vault.clone());
            return Ok(());
        }

        self.ensure_name_available(vault).await?;
        let handle = self
            .cancel
            .run(
                "create-key-vault",
                self.provider.begin_create_key_vault(
                    vault,
                    &self.req.resource_group_location,
                    &self.req.tenant_id,
                ),
            )
            .await?
            .map_err(|e| ReconcileError::transport("create-key-vault", vault, e))?;
        self.poller
            .await_terminal(&handle, self.tuning.key_vault_poll_interval)
            .await?;
        self.created(vault.clone());
        Ok(())
    }

    async fn lock(&mut self, target: &ResourceIdentity) -> Result<(), ReconcileError> {
        let scope = LockScope::for_resource(target)
            .ok_or_else(|| ReconcileError::Internal(format!("{} cannot be locked", target)))?;
        let (lock, outcome) = self.locks.ensure_lock(&scope, &self.tuning.lock_name).await?;
        self.report.changes.push(match outcome {
            LockOutcome::Created => Change::LockCreated { lock },
            LockOutcome::Present => Change::LockPresent { lock },
        });
        Ok(())
    }

    async fn access_policy(&mut self, vault: &ResourceIdentity) -> Result<(), ReconcileError> {
        let principal_id =
            effective_principal(self.req.explicit_principal_id(), self.identity, self.cancel).await?;
        let outcome = self
            .policies
            .ensure_policy(
                vault,
                &principal_id,
                &self.req.tenant_id,
                &PermissionSet::backend_key_permissions(),
            )
            .await?;

        let vault = vault.clone();
        self.report.changes.push(match outcome {
            PolicyOutcome::Updated => Change::PolicyUpdated { vault, principal_id },
            PolicyOutcome::Unchanged => Change::PolicyUnchanged { vault, principal_id },
        });
        Ok(())
    }

    async fn key(&mut self) -> Result<(), ReconcileError> {
        let key = self.req.key_vault_key();
        if self.prober.exists(&key).await? {
            self.existing(key);
            return Ok(());
        }

        self.cancel
            .run("create-key", self.provider.create_key(&key))
            .await?
            .map_err(|e| ReconcileError::transport("create-key", &key, e))?;
        self.created(key);
        Ok(())
    }

    async fn ensure_name_available(&self, resource: &ResourceIdentity) -> Result<(), ReconcileError> {
        let availability = self
            .cancel
            .run("check-name-availability", self.provider.check_name_availability(resource))
            .await?
            .map_err(|e| ReconcileError::transport("check-name-availability", resource, e))?;
        if availability.available {
            return Ok(());
        }
        Err(ReconcileError::NameUnavailable {
            resource: resource.to_string(),
            reason: availability.reason.unwrap_or_else(|| "Unknown".into()),
            message: availability.message.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tfprep_domain::{AccessPolicyEntry, CredentialOptions, RegistrationState, ResourceKind};
    use tfprep_driver::InMemoryProvider;

    use crate::cancel::cancel_pair;

    fn request() -> ProvisioningRequest {
        ProvisioningRequest {
            subscription_id: "2a6936a5-fc30-492a-b96b-8ee5d9e3a1f2".into(),
            tenant_id: "d1d4e5c8-5a3a-4e0f-9f5e-0c4b7e3c0a11".into(),
            resource_group_name: "rg-dev-we-tfstate".into(),
            resource_group_location: "westeurope".into(),
            storage_account_name: "sadevwetfstate".into(),
            storage_account_container: "tfstate-dev".into(),
            key_vault_name: "kv-dev-we-tfstate".into(),
            key_vault_key_name: "sops-key".into(),
            service_principal_object_id: None,
            resource_locks: true,
            credentials: CredentialOptions::default(),
        }
    }

    fn fast_tuning() -> Tuning {
        Tuning {
            storage_account_poll_interval: Duration::from_millis(1),
            key_vault_poll_interval: Duration::from_millis(1),
            registration_backoff_step: Duration::from_millis(1),
            ..Tuning::default()
        }
    }

    fn orchestrator(provider: &Arc<InMemoryProvider>) -> Orchestrator {
        Orchestrator::new(provider.clone(), provider.clone(), fast_tuning(), CancelToken::never())
    }

    fn memory() -> InMemoryProvider {
        InMemoryProvider::new().with_principal("6f1c1f7e-2b3a-4c55-9d0e-123456789abc")
    }

    #[tokio::test]
    async fn fresh_subscription_gets_every_resource() {
        let provider = Arc::new(memory().with_operation_polls(2));
        let report = orchestrator(&provider).run(&request()).await.unwrap();

        let req = request();
        for resource in [
            req.resource_group(),
            req.storage_account(),
            req.blob_container(),
            req.key_vault(),
            req.key_vault_key(),
        ] {
            assert!(provider.exists(&resource), "{resource} should exist");
        }
        assert_eq!(report.created(), 7);
        assert!(report.finished_at.is_some());
        assert!(report.changes.iter().any(|c| matches!(c, Change::PolicyUpdated { .. })));
    }

    #[tokio::test]
    async fn second_run_creates_nothing() {
        let provider = Arc::new(memory());
        let orch = orchestrator(&provider);
        orch.run(&request()).await.unwrap();
        let creates = provider.create_calls();
        let writes = provider.policy_writes();

        let again = orch.run(&request()).await.unwrap();
        assert_eq!(provider.create_calls(), creates);
        assert_eq!(provider.policy_writes(), writes);
        assert_eq!(again.created(), 0);
        assert!(again.is_noop(), "changes: {:?}", again.changes);
    }

    #[tokio::test]
    async fn steps_run_in_dependency_order() {
        let provider = Arc::new(memory());
        orchestrator(&provider).run(&request()).await.unwrap();

        let kinds: Vec<ResourceKind> = provider
            .calls()
            .iter()
            .filter(|c| c.starts_with("create "))
            .map(|c| {
                if c.contains("resource-lock") {
                    ResourceKind::ResourceLock
                } else if c.contains("blob-container") {
                    ResourceKind::BlobContainer
                } else if c.contains("key-vault-key") {
                    ResourceKind::KeyVaultKey
                } else if c.contains("key-vault") {
                    ResourceKind::KeyVault
                } else if c.contains("storage-account") {
                    ResourceKind::StorageAccount
                } else {
                    ResourceKind::ResourceGroup
                }
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ResourceGroup,
                ResourceKind::StorageAccount,
                ResourceKind::ResourceLock,
                ResourceKind::BlobContainer,
                ResourceKind::KeyVault,
                ResourceKind::ResourceLock,
                ResourceKind::KeyVaultKey,
            ]
        );
    }

    #[tokio::test]
    async fn storage_failure_stops_later_steps() {
        let provider = Arc::new(memory().fail_create(ResourceKind::StorageAccount, "quota"));
        let err = orchestrator(&provider).run(&request()).await.unwrap_err();

        assert!(
            matches!(err, ReconcileError::Transport { operation: "create-storage-account", .. }),
            "got: {err}"
        );
        assert_eq!(provider.create_calls_for(ResourceKind::ResourceGroup), 1);
        assert_eq!(provider.create_calls_for(ResourceKind::StorageAccount), 1);
        assert_eq!(provider.create_calls_for(ResourceKind::ResourceLock), 0);
        assert_eq!(provider.create_calls_for(ResourceKind::BlobContainer), 0);
        assert_eq!(provider.create_calls_for(ResourceKind::KeyVault), 0);
        assert_eq!(provider.create_calls_for(ResourceKind::KeyVaultKey), 0);
        assert_eq!(provider.policy_writes(), 0);
        assert_eq!(provider.identity_lookups(), 0);
    }

    #[tokio::test]
    async fn failed_storage_operation_stops_later_steps() {
        let provider = Arc::new(
            memory()
                .with_operation_polls(1)
                .fail_operation(ResourceKind::StorageAccount, "InternalError"),
        );
        let err = orchestrator(&provider).run(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::OperationFailed { .. }), "got: {err}");
        assert_eq!(provider.create_calls_for(ResourceKind::BlobContainer), 0);
    }

    #[tokio::test]
    async fn invalid_request_makes_no_calls() {
        let provider = Arc::new(memory());
        let mut req = request();
        req.storage_account_name = "Not-Valid".into();
        req.key_vault_name = "1kv".into();

        match orchestrator(&provider).run(&req).await {
            Err(ReconcileError::Validation(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(provider.calls().is_empty(), "calls: {:?}", provider.calls());
    }

    #[tokio::test]
    async fn locks_disabled_skips_lock_steps() {
        let provider = Arc::new(memory());
        let mut req = request();
        req.resource_locks = false;

        let report = orchestrator(&provider).run(&req).await.unwrap();
        assert_eq!(provider.create_calls_for(ResourceKind::ResourceLock), 0);
        assert!(!provider.calls().iter().any(|c| c.contains("resource-lock")));
        assert_eq!(report.created(), 5);
    }

    #[tokio::test]
    async fn taken_storage_name_fails_before_create() {
        let provider = Arc::new(memory().with_taken_name("sadevwetfstate"));
        let err = orchestrator(&provider).run(&request()).await.unwrap_err();
        match err {
            ReconcileError::NameUnavailable { reason, .. } => assert_eq!(reason, "AlreadyExists"),
            other => panic!("expected name unavailable, got {other}"),
        }
        assert_eq!(provider.create_calls_for(ResourceKind::StorageAccount), 0);
    }

    #[tokio::test]
    async fn existing_resources_skip_name_checks() {
        let req = request();
        let provider = Arc::new(
            memory()
                .with_existing(&req.storage_account())
                .with_existing(&req.key_vault())
                .with_taken_name("sadevwetfstate")
                .with_taken_name("kv-dev-we-tfstate"),
        );
        orchestrator(&provider).run(&req).await.unwrap();
        assert!(!provider.calls().iter().any(|c| c.starts_with("check-name")));
    }

    #[tokio::test]
    async fn storage_provider_is_registered_first() {
        use RegistrationState::*;
        let provider = Arc::new(memory().with_registration(
            STORAGE_NAMESPACE,
            NotRegistered,
            Registering,
            vec![Registering, Registered],
        ));
        let report = orchestrator(&provider).run(&request()).await.unwrap();

        assert!(report.changes.contains(&Change::ProviderRegistered {
            namespace: STORAGE_NAMESPACE.into(),
            retries: 1,
        }));
        let calls = provider.calls();
        let register = calls.iter().position(|c| c.starts_with("register ")).unwrap();
        let create = calls
            .iter()
            .position(|c| c.starts_with("create storage-account"))
            .unwrap();
        assert!(register < create);
    }

    #[tokio::test]
    async fn stuck_registration_blocks_storage_create() {
        let provider = Arc::new(memory().with_registration(
            STORAGE_NAMESPACE,
            RegistrationState::NotRegistered,
            RegistrationState::Registering,
            vec![RegistrationState::Registering],
        ));
        let err = orchestrator(&provider).run(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::RegistrationTimeout { .. }), "got: {err}");
        assert_eq!(provider.create_calls_for(ResourceKind::StorageAccount), 0);
    }

    #[tokio::test]
    async fn explicit_principal_skips_identity_lookup() {
        let provider = Arc::new(memory());
        let mut req = request();
        req.service_principal_object_id = Some("0b0c3c4e-1d2f-4a5b-8c9d-abcdefabcdef".into());

        let report = orchestrator(&provider).run(&req).await.unwrap();
        assert_eq!(provider.identity_lookups(), 0);
        assert!(report.changes.iter().any(|c| matches!(
            c,
            Change::PolicyUpdated { principal_id, .. } if principal_id == "0b0c3c4e-1d2f-4a5b-8c9d-abcdefabcdef"
        )));
    }

    #[tokio::test]
    async fn policy_run_keeps_other_principals() {
        let req = request();
        let other = AccessPolicyEntry {
            tenant_id: req.tenant_id.clone(),
            object_id: "p2".into(),
            keys: PermissionSet::new(["get"]),
        };
        let provider = Arc::new(
            memory()
                .with_existing(&req.key_vault())
                .with_access_policy(&req.key_vault(), other.clone()),
        );
        orchestrator(&provider).run(&req).await.unwrap();

        let policies = provider.policies(&req.key_vault());
        assert!(policies.contains(&other));
        assert_eq!(policies.len(), 2);
    }

    #[tokio::test]
    async fn probe_failure_is_not_treated_as_missing() {
        let provider = Arc::new(memory().fail_probe(ResourceKind::BlobContainer));
        let err = orchestrator(&provider).run(&request()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { operation: "probe", .. }));
        assert_eq!(provider.create_calls_for(ResourceKind::BlobContainer), 0);
        assert_eq!(provider.create_calls_for(ResourceKind::KeyVault), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let provider = Arc::new(memory().with_operation_polls(u32::MAX));
        let (handle, token) = cancel_pair();
        let tuning = Tuning {
            storage_account_poll_interval: Duration::from_secs(30),
            ..fast_tuning()
        };
        let orch = Orchestrator::new(provider.clone(), provider.clone(), tuning, token);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), orch.run(&request()))
            .await
            .expect("run should stop promptly once cancelled");
        assert!(res.unwrap_err().is_cancelled());
        assert_eq!(provider.create_calls_for(ResourceKind::BlobContainer), 0);
    }
}
