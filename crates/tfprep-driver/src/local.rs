use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use tfprep_domain::{AccessPolicyEntry, PermissionSet, RegistrationState, ResourceIdentity, ResourceKind};
use tracing::debug;

use crate::error::DriverError;
use crate::provider::{
    ExistenceOutcome, IdentityLookup, NameAvailability, OperationHandle, OperationStatus, Provider,
};

/// A provider that keeps cloud state in memory.
///
/// - Performs no I/O; resources exist once their create call (or operation) completes.
/// - Registration, operation progress and failures can be scripted per test.
/// - Counts every call so tests can assert on what was and was not invoked.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    existing: HashSet<String>,
    taken_names: HashSet<String>,
    registrations: HashMap<String, RegistrationScript>,
    operation_polls: u32,
    pending: HashMap<String, PendingOperation>,
    next_operation: u32,
    failing_operations: HashMap<ResourceKind, String>,
    failing_creates: HashMap<ResourceKind, String>,
    failing_probes: HashSet<ResourceKind>,
    policies: HashMap<String, Vec<AccessPolicyEntry>>,
    principal: Option<String>,

    calls: Vec<String>,
    creates: Vec<ResourceIdentity>,
    policy_writes: u32,
    registration_reads: u32,
    identity_lookups: u32,
}

#[derive(Debug)]
struct RegistrationScript {
    state: RegistrationState,
    on_register: RegistrationState,
    /// States returned by reads after the register call; the last one repeats.
    polls: VecDeque<RegistrationState>,
    registered: bool,
}

#[derive(Debug)]
struct PendingOperation {
    resource: ResourceIdentity,
    remaining: u32,
}

fn key(identity: &ResourceIdentity) -> String {
    identity.to_string()
}

fn injected(identity: &ResourceIdentity, status: u16, code: &str, message: &str) -> DriverError {
    DriverError::UnexpectedStatus {
        method: "PUT",
        url: format!("memory://{}", identity),
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&mut self) -> &mut State {
        self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Treat `identity` as already provisioned.
    pub fn with_existing(mut self, identity: &ResourceIdentity) -> Self {
        self.state_mut().existing.insert(key(identity));
        self
    }

    /// Script a provider namespace. Namespaces without a script read as `Registered`.
    pub fn with_registration(
        mut self,
        namespace: &str,
        initial: RegistrationState,
        on_register: RegistrationState,
        polls: impl IntoIterator<Item = RegistrationState>,
    ) -> Self {
        self.state_mut().registrations.insert(
            namespace.to_string(),
            RegistrationScript {
                state: initial,
                on_register,
                polls: polls.into_iter().collect(),
                registered: false,
            },
        );
        self
    }

    /// Long-running creates report `InProgress` this many times before finishing.
    /// Zero makes them complete synchronously.
    pub fn with_operation_polls(mut self, polls: u32) -> Self {
        self.state_mut().operation_polls = polls;
        self
    }

    /// Long-running creates of `kind` end in `Failed` with `detail`.
    pub fn fail_operation(mut self, kind: ResourceKind, detail: &str) -> Self {
        self.state_mut().failing_operations.insert(kind, detail.to_string());
        self
    }

    /// Create calls for `kind` are rejected with a 500.
    pub fn fail_create(mut self, kind: ResourceKind, message: &str) -> Self {
        self.state_mut().failing_creates.insert(kind, message.to_string());
        self
    }

    /// Existence checks for `kind` fail with a 403.
    pub fn fail_probe(mut self, kind: ResourceKind) -> Self {
        self.state_mut().failing_probes.insert(kind);
        self
    }

    /// The global name check reports `name` as taken.
    pub fn with_taken_name(mut self, name: &str) -> Self {
        self.state_mut().taken_names.insert(name.to_string());
        self
    }

    pub fn with_access_policy(mut self, vault: &ResourceIdentity, entry: AccessPolicyEntry) -> Self {
        self.state_mut().policies.entry(key(vault)).or_default().push(entry);
        self
    }

    /// Object id returned by [`IdentityLookup::current_principal_id`].
    pub fn with_principal(mut self, object_id: &str) -> Self {
        self.state_mut().principal = Some(object_id.to_string());
        self
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn exists(&self, identity: &ResourceIdentity) -> bool {
        self.state().existing.contains(&key(identity))
    }

    /// Every call in order, as `"<operation> <identity or namespace>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state().creates.len()
    }

    pub fn create_calls_for(&self, kind: ResourceKind) -> usize {
        self.state().creates.iter().filter(|c| c.kind == kind).count()
    }

    pub fn policy_writes(&self) -> u32 {
        self.state().policy_writes
    }

    pub fn registration_reads(&self) -> u32 {
        self.state().registration_reads
    }

    pub fn identity_lookups(&self) -> u32 {
        self.state().identity_lookups
    }

    pub fn policies(&self, vault: &ResourceIdentity) -> Vec<AccessPolicyEntry> {
        self.state().policies.get(&key(vault)).cloned().unwrap_or_default()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Record a create call, honouring injected failures.
    fn record_create(&self, identity: &ResourceIdentity) -> Result<(), DriverError> {
        let mut state = self.state();
        state.calls.push(format!("create {}", identity));
        state.creates.push(identity.clone());
        if let Some(message) = state.failing_creates.get(&identity.kind) {
            return Err(injected(identity, 500, "InjectedFailure", message));
        }
        Ok(())
    }

    fn begin(&self, identity: &ResourceIdentity) -> Result<OperationHandle, DriverError> {
        self.record_create(identity)?;
        let mut state = self.state();
        if state.operation_polls == 0 && !state.failing_operations.contains_key(&identity.kind) {
            state.existing.insert(key(identity));
            return Ok(OperationHandle::completed(
                identity.clone(),
                json!({ "name": identity.name }),
            ));
        }

        state.next_operation += 1;
        let token = format!("memory-op-{}", state.next_operation);
        let remaining = state.operation_polls;
        state.pending.insert(
            token.clone(),
            PendingOperation { resource: identity.clone(), remaining },
        );
        Ok(OperationHandle::pending(identity.clone(), token))
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self, identity: &ResourceIdentity) -> ExistenceOutcome {
        debug!(resource = %identity, "InMemoryProvider: probe");
        let mut state = self.state();
        state.calls.push(format!("probe {}", identity));
        if state.failing_probes.contains(&identity.kind) {
            return ExistenceOutcome::TransportError(DriverError::UnexpectedStatus {
                method: "GET",
                url: format!("memory://{}", identity),
                status: 403,
                code: "AuthorizationFailed".into(),
                message: "injected probe failure".into(),
            });
        }
        if state.existing.contains(&key(identity)) {
            ExistenceOutcome::Exists
        } else {
            ExistenceOutcome::NotFound
        }
    }

    async fn create_resource_group(&self, name: &str, _location: &str) -> Result<(), DriverError> {
        let identity = ResourceIdentity::resource_group(name);
        debug!(resource = %identity, "InMemoryProvider: create_resource_group");
        self.record_create(&identity)?;
        self.state().existing.insert(key(&identity));
        Ok(())
    }

    async fn registration_state(&self, namespace: &str) -> Result<RegistrationState, DriverError> {
        let mut state = self.state();
        state.calls.push(format!("registration-state {}", namespace));
        state.registration_reads += 1;
        let Some(script) = state.registrations.get_mut(namespace) else {
            return Ok(RegistrationState::Registered);
        };
        if script.registered {
            let next = if script.polls.len() > 1 {
                script.polls.pop_front()
            } else {
                script.polls.front().cloned()
            };
            if let Some(next) = next {
                script.state = next;
            }
        }
        debug!(namespace, state = %script.state, "InMemoryProvider: registration_state");
        Ok(script.state.clone())
    }

    async fn register_provider(&self, namespace: &str) -> Result<RegistrationState, DriverError> {
        let mut state = self.state();
        state.calls.push(format!("register {}", namespace));
        let Some(script) = state.registrations.get_mut(namespace) else {
            return Ok(RegistrationState::Registered);
        };
        script.registered = true;
        script.state = script.on_register.clone();
        Ok(script.state.clone())
    }

    async fn check_name_availability(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<NameAvailability, DriverError> {
        let mut state = self.state();
        state.calls.push(format!("check-name {}", identity));
        if state.taken_names.contains(&identity.name) {
            return Ok(NameAvailability {
                available: false,
                reason: Some("AlreadyExists".into()),
                message: Some(format!("{} is already taken", identity.name)),
            });
        }
        Ok(NameAvailability::available())
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus, DriverError> {
        if let Some(body) = &handle.completed {
            return Ok(OperationStatus::Succeeded(body.clone()));
        }

        let mut state = self.state();
        state.calls.push(format!("operation-status {}", handle.resource));
        let Some(op) = state.pending.get_mut(&handle.token) else {
            return Err(DriverError::Internal(format!("unknown operation {}", handle.token)));
        };
        if op.remaining > 0 {
            op.remaining -= 1;
            return Ok(OperationStatus::InProgress);
        }

        let resource = op.resource.clone();
        state.pending.remove(&handle.token);
        if let Some(detail) = state.failing_operations.get(&resource.kind) {
            return Ok(OperationStatus::Failed(detail.clone()));
        }
        state.existing.insert(key(&resource));
        Ok(OperationStatus::Succeeded(json!({ "name": resource.name })))
    }

    async fn begin_create_storage_account(
        &self,
        account: &ResourceIdentity,
        _location: &str,
    ) -> Result<OperationHandle, DriverError> {
        debug!(resource = %account, "InMemoryProvider: begin_create_storage_account");
        self.begin(account)
    }

    async fn create_blob_container(&self, container: &ResourceIdentity) -> Result<(), DriverError> {
        debug!(resource = %container, "InMemoryProvider: create_blob_container");
        self.record_create(container)?;
        self.state().existing.insert(key(container));
        Ok(())
    }

    async fn begin_create_key_vault(
        &self,
        vault: &ResourceIdentity,
        _location: &str,
        _tenant_id: &str,
    ) -> Result<OperationHandle, DriverError> {
        debug!(resource = %vault, "InMemoryProvider: begin_create_key_vault");
        self.begin(vault)
    }

    async fn access_policies(&self, vault: &ResourceIdentity) -> Result<Vec<AccessPolicyEntry>, DriverError> {
        let mut state = self.state();
        state.calls.push(format!("access-policies {}", vault));
        Ok(state.policies.get(&key(vault)).cloned().unwrap_or_default())
    }

    async fn add_access_policy(
        &self,
        vault: &ResourceIdentity,
        entry: &AccessPolicyEntry,
    ) -> Result<(), DriverError> {
        debug!(resource = %vault, object_id = %entry.object_id, "InMemoryProvider: add_access_policy");
        let mut state = self.state();
        state.calls.push(format!("add-access-policy {}", vault));
        state.policy_writes += 1;

        let entries = state.policies.entry(key(vault)).or_default();
        match entries.iter_mut().find(|e| e.object_id == entry.object_id) {
            // "add" merges permissions into the principal's existing entry.
            Some(existing) => {
                let mut tokens: Vec<String> = existing.keys.tokens().to_vec();
                for token in entry.keys.tokens() {
                    if !tokens.iter().any(|t| t.eq_ignore_ascii_case(token)) {
                        tokens.push(token.clone());
                    }
                }
                existing.keys = PermissionSet::new(tokens);
            }
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn create_key(&self, key_id: &ResourceIdentity) -> Result<(), DriverError> {
        debug!(resource = %key_id, "InMemoryProvider: create_key");
        self.record_create(key_id)?;
        self.state().existing.insert(key(key_id));
        Ok(())
    }

    async fn create_lock(&self, lock: &ResourceIdentity, notes: &str) -> Result<(), DriverError> {
        debug!(resource = %lock, notes, "InMemoryProvider: create_lock");
        self.record_create(lock)?;
        self.state().existing.insert(key(lock));
        Ok(())
    }
}

#[async_trait]
impl IdentityLookup for InMemoryProvider {
    async fn current_principal_id(&self) -> Result<String, DriverError> {
        let mut state = self.state();
        state.identity_lookups += 1;
        state
            .principal
            .clone()
            .ok_or_else(|| DriverError::Auth("no signed-in principal".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> ResourceIdentity {
        ResourceIdentity::key_vault("rg", "kv-test")
    }

    #[tokio::test]
    async fn created_resources_then_probe_as_existing() {
        let p = InMemoryProvider::new();
        let rg = ResourceIdentity::resource_group("rg");
        assert!(matches!(p.probe(&rg).await, ExistenceOutcome::NotFound));
        p.create_resource_group("rg", "westeurope").await.unwrap();
        assert!(matches!(p.probe(&rg).await, ExistenceOutcome::Exists));
        assert_eq!(p.create_calls(), 1);
    }

    #[tokio::test]
    async fn scripted_operation_reports_progress() {
        let p = InMemoryProvider::new().with_operation_polls(2);
        let handle = p.begin_create_key_vault(&vault(), "westeurope", "t").await.unwrap();
        assert_eq!(p.operation_status(&handle).await.unwrap(), OperationStatus::InProgress);
        assert_eq!(p.operation_status(&handle).await.unwrap(), OperationStatus::InProgress);
        assert!(matches!(
            p.operation_status(&handle).await.unwrap(),
            OperationStatus::Succeeded(_)
        ));
        assert!(p.exists(&vault()));
    }

    #[tokio::test]
    async fn registration_script_repeats_last_poll() {
        let p = InMemoryProvider::new().with_registration(
            "Microsoft.Storage",
            RegistrationState::NotRegistered,
            RegistrationState::Registering,
            [RegistrationState::Registering],
        );
        assert_eq!(
            p.registration_state("Microsoft.Storage").await.unwrap(),
            RegistrationState::NotRegistered
        );
        p.register_provider("Microsoft.Storage").await.unwrap();
        for _ in 0..3 {
            assert_eq!(
                p.registration_state("Microsoft.Storage").await.unwrap(),
                RegistrationState::Registering
            );
        }
        assert_eq!(
            p.registration_state("Microsoft.KeyVault").await.unwrap(),
            RegistrationState::Registered
        );
    }

    #[tokio::test]
    async fn add_policy_merges_into_existing_entry() {
        let p = InMemoryProvider::new().with_access_policy(
            &vault(),
            AccessPolicyEntry {
                tenant_id: "t".into(),
                object_id: "p1".into(),
                keys: PermissionSet::new(["Get"]),
            },
        );
        p.add_access_policy(
            &vault(),
            &AccessPolicyEntry {
                tenant_id: "t".into(),
                object_id: "p1".into(),
                keys: PermissionSet::new(["get", "list"]),
            },
        )
        .await
        .unwrap();

        let policies = p.policies(&vault());
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].keys, PermissionSet::new(["get", "list"]));
    }

    #[tokio::test]
    async fn injected_create_failure_is_counted() {
        let p = InMemoryProvider::new().fail_create(ResourceKind::BlobContainer, "boom");
        let container = ResourceIdentity::blob_container("rg", "sa", "c");
        let err = p.create_blob_container(&container).await.unwrap_err();
        assert!(err.to_string().contains("boom"), "got: {}", err);
        assert_eq!(p.create_calls_for(ResourceKind::BlobContainer), 1);
        assert!(!p.exists(&container));
    }
}
