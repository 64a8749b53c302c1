use async_trait::async_trait;
use serde_json::Value;
use tfprep_domain::{AccessPolicyEntry, RegistrationState, ResourceIdentity};

use crate::error::DriverError;

/// Answer to "does this resource already exist".
///
/// `NotFound` is the only outcome that leads to a create call. A
/// `TransportError` is never read as "needs creation".
#[derive(Debug)]
pub enum ExistenceOutcome {
    Exists,
    NotFound,
    TransportError(DriverError),
}

/// Result of a provider-side global name check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAvailability {
    pub available: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl NameAvailability {
    pub fn available() -> Self {
        Self { available: true, reason: None, message: None }
    }
}

/// Token for a long-running create, queried via [`Provider::operation_status`].
#[derive(Debug, Clone)]
pub struct OperationHandle {
    /// Resource the operation is creating.
    pub resource: ResourceIdentity,
    /// Provider-specific status token (the ARM operation URL for Azure).
    pub token: String,
    /// Set when the create finished synchronously; no polling needed.
    pub completed: Option<Value>,
}

impl OperationHandle {
    pub fn pending(resource: ResourceIdentity, token: impl Into<String>) -> Self {
        Self { resource, token: token.into(), completed: None }
    }

    pub fn completed(resource: ResourceIdentity, body: Value) -> Self {
        Self { resource, token: String::new(), completed: Some(body) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    InProgress,
    /// Carries the created resource's representation.
    Succeeded(Value),
    /// Carries the provider's failure detail.
    Failed(String),
}

/// Everything the provisioning core needs from a cloud provider.
///
/// Every method is a single remote call; sequencing, retries and polling
/// belong to the caller.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    // ── Existence ─────────────────────────────────────────────────────────────

    async fn probe(&self, identity: &ResourceIdentity) -> ExistenceOutcome;

    // ── Resource manager ──────────────────────────────────────────────────────

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<(), DriverError>;

    async fn registration_state(&self, namespace: &str) -> Result<RegistrationState, DriverError>;

    /// Issue the register call; returns the state reported in its response.
    async fn register_provider(&self, namespace: &str) -> Result<RegistrationState, DriverError>;

    /// Global name check; only storage accounts and key vaults support it.
    async fn check_name_availability(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<NameAvailability, DriverError>;

    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus, DriverError>;

    // ── Storage ───────────────────────────────────────────────────────────────

    async fn begin_create_storage_account(
        &self,
        account: &ResourceIdentity,
        location: &str,
    ) -> Result<OperationHandle, DriverError>;

    async fn create_blob_container(&self, container: &ResourceIdentity) -> Result<(), DriverError>;

    // ── Key vault ─────────────────────────────────────────────────────────────

    async fn begin_create_key_vault(
        &self,
        vault: &ResourceIdentity,
        location: &str,
        tenant_id: &str,
    ) -> Result<OperationHandle, DriverError>;

    async fn access_policies(&self, vault: &ResourceIdentity) -> Result<Vec<AccessPolicyEntry>, DriverError>;

    /// Additive update: entries for other principals are left untouched.
    async fn add_access_policy(
        &self,
        vault: &ResourceIdentity,
        entry: &AccessPolicyEntry,
    ) -> Result<(), DriverError>;

    /// Create-if-not-exists; idempotent on the provider side.
    async fn create_key(&self, key: &ResourceIdentity) -> Result<(), DriverError>;

    // ── Locks ─────────────────────────────────────────────────────────────────

    /// Create a `CanNotDelete` lock. `lock` must be a resource-lock identity.
    async fn create_lock(&self, lock: &ResourceIdentity, notes: &str) -> Result<(), DriverError>;
}

/// Resolves the object id of whoever the credentials belong to.
#[async_trait]
pub trait IdentityLookup: Send + Sync + 'static {
    async fn current_principal_id(&self) -> Result<String, DriverError>;
}
