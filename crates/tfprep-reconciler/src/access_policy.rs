use std::sync::Arc;

use tfprep_domain::{AccessPolicyEntry, PermissionSet, ResourceIdentity};
use tfprep_driver::{IdentityLookup, Provider};
use tracing::{info, Instrument, Span};

use crate::cancel::CancelToken;
use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Unchanged,
    Updated,
}

/// Resolve whose access is being granted: the explicit service principal if
/// one was supplied, otherwise whoever the credentials belong to.
pub async fn effective_principal(
    explicit: Option<&str>,
    lookup: &dyn IdentityLookup,
    cancel: &CancelToken,
) -> Result<String, ReconcileError> {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    let id = cancel
        .run("identity-lookup", lookup.current_principal_id())
        .await?
        .map_err(|e| ReconcileError::transport("identity-lookup", "current principal", e))?;
    info!(principal_id = %id, "resolved current principal");
    Ok(id)
}

/// Keeps one principal's key permissions on a vault in the desired shape
/// using only additive updates.
pub struct AccessPolicyReconciler {
    provider: Arc<dyn Provider>,
    cancel: CancelToken,
    span: Span,
}

impl AccessPolicyReconciler {
    pub fn new(provider: Arc<dyn Provider>, cancel: CancelToken, span: Span) -> Self {
        Self { provider, cancel, span }
    }

    pub async fn ensure_policy(
        &self,
        vault: &ResourceIdentity,
        principal_id: &str,
        tenant_id: &str,
        desired: &PermissionSet,
    ) -> Result<PolicyOutcome, ReconcileError> {
        self.reconcile(vault, principal_id, tenant_id, desired)
            .instrument(self.span.clone())
            .await
    }

    async fn reconcile(
        &self,
        vault: &ResourceIdentity,
        principal_id: &str,
        tenant_id: &str,
        desired: &PermissionSet,
    ) -> Result<PolicyOutcome, ReconcileError> {
        let current = self
            .cancel
            .run("read-access-policies", self.provider.access_policies(vault))
            .await?
            .map_err(|e| ReconcileError::transport("read-access-policies", vault, e))?;

        let up_to_date = current
            .iter()
            .filter(|entry| entry.object_id == principal_id)
            .any(|entry| entry.keys == *desired);
        if up_to_date {
            info!(resource = %vault, principal_id, "access policy already correct");
            return Ok(PolicyOutcome::Unchanged);
        }

        let entry = AccessPolicyEntry {
            tenant_id: tenant_id.to_string(),
            object_id: principal_id.to_string(),
            keys: desired.clone(),
        };
        self.cancel
            .run("add-access-policy", self.provider.add_access_policy(vault, &entry))
            .await?
            .map_err(|e| ReconcileError::transport("add-access-policy", vault, e))?;
        info!(resource = %vault, principal_id, "access policy created or updated");
        Ok(PolicyOutcome::Updated)
    }
}
