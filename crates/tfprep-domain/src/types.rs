use serde::{Deserialize, Serialize};

// ── Request ───────────────────────────────────────────────────────────────────

/// Credential sources the authentication chain is allowed to try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialOptions {
    pub exclude_cli: bool,
    pub exclude_environment: bool,
    pub exclude_msi: bool,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            exclude_cli: false,
            exclude_environment: true,
            exclude_msi: true,
        }
    }
}

/// Everything one provisioning run needs. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group_name: String,
    pub resource_group_location: String,
    pub storage_account_name: String,
    pub storage_account_container: String,
    pub key_vault_name: String,
    pub key_vault_key_name: String,
    /// When absent the signed-in principal is looked up instead.
    pub service_principal_object_id: Option<String>,
    pub resource_locks: bool,
    pub credentials: CredentialOptions,
}

impl ProvisioningRequest {
    pub fn resource_group(&self) -> ResourceIdentity {
        ResourceIdentity::resource_group(&self.resource_group_name)
    }

    pub fn storage_account(&self) -> ResourceIdentity {
        ResourceIdentity::storage_account(&self.resource_group_name, &self.storage_account_name)
    }

    pub fn blob_container(&self) -> ResourceIdentity {
        ResourceIdentity::blob_container(
            &self.resource_group_name,
            &self.storage_account_name,
            &self.storage_account_container,
        )
    }

    pub fn key_vault(&self) -> ResourceIdentity {
        ResourceIdentity::key_vault(&self.resource_group_name, &self.key_vault_name)
    }

    pub fn key_vault_key(&self) -> ResourceIdentity {
        ResourceIdentity::key_vault_key(
            &self.resource_group_name,
            &self.key_vault_name,
            &self.key_vault_key_name,
        )
    }

    /// The supplied service principal object id, ignoring an empty string.
    pub fn explicit_principal_id(&self) -> Option<&str> {
        self.service_principal_object_id
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}

// ── Resource identity ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    BlobContainer,
    KeyVault,
    KeyVaultKey,
    ResourceLock,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::ResourceGroup => write!(f, "resource-group"),
            ResourceKind::StorageAccount => write!(f, "storage-account"),
            ResourceKind::BlobContainer => write!(f, "blob-container"),
            ResourceKind::KeyVault => write!(f, "key-vault"),
            ResourceKind::KeyVaultKey => write!(f, "key-vault-key"),
            ResourceKind::ResourceLock => write!(f, "resource-lock"),
        }
    }
}

/// Where a resource sits relative to its resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// Directly inside the resource group.
    Group,
    /// Nested under a named parent: the account for containers, the vault for keys.
    Parent { name: String },
    /// Attached to another resource; used by locks.
    Lock(LockScope),
}

/// Uniform (kind, resource group, name) handle used by probes and locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub resource_group: String,
    pub name: String,
    pub scope: Scope,
}

impl ResourceIdentity {
    pub fn resource_group(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kind: ResourceKind::ResourceGroup,
            resource_group: name.clone(),
            name,
            scope: Scope::Group,
        }
    }

    pub fn storage_account(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::StorageAccount,
            resource_group: resource_group.into(),
            name: name.into(),
            scope: Scope::Group,
        }
    }

    pub fn blob_container(
        resource_group: impl Into<String>,
        account: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: ResourceKind::BlobContainer,
            resource_group: resource_group.into(),
            name: name.into(),
            scope: Scope::Parent { name: account.into() },
        }
    }

    pub fn key_vault(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::KeyVault,
            resource_group: resource_group.into(),
            name: name.into(),
            scope: Scope::Group,
        }
    }

    pub fn key_vault_key(
        resource_group: impl Into<String>,
        vault: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: ResourceKind::KeyVaultKey,
            resource_group: resource_group.into(),
            name: name.into(),
            scope: Scope::Parent { name: vault.into() },
        }
    }

    pub fn resource_lock(scope: LockScope, lock_name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::ResourceLock,
            resource_group: scope.resource_group.clone(),
            name: lock_name.into(),
            scope: Scope::Lock(scope),
        }
    }

    pub fn parent_name(&self) -> Option<&str> {
        match &self.scope {
            Scope::Parent { name } => Some(name),
            _ => None,
        }
    }

    pub fn lock_scope(&self) -> Option<&LockScope> {
        match &self.scope {
            Scope::Lock(scope) => Some(scope),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Scope::Group if self.kind == ResourceKind::ResourceGroup => {
                write!(f, "{} '{}'", self.kind, self.name)
            }
            Scope::Group => write!(f, "{} '{}/{}'", self.kind, self.resource_group, self.name),
            Scope::Parent { name } => write!(
                f,
                "{} '{}/{}/{}'",
                self.kind, self.resource_group, name, self.name
            ),
            Scope::Lock(scope) => write!(
                f,
                "{} '{}' on {}/{}",
                self.kind,
                self.name,
                self.resource_group,
                scope.resource_path()
            ),
        }
    }
}

/// Resource-level address a management lock attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockScope {
    pub resource_group: String,
    pub provider_namespace: String,
    /// Empty for top-level resources.
    pub parent_path: String,
    pub resource_type: String,
    pub resource_name: String,
}

impl LockScope {
    /// Lock scope for the lockable kinds; `None` for everything else.
    pub fn for_resource(target: &ResourceIdentity) -> Option<Self> {
        let (namespace, resource_type) = match target.kind {
            ResourceKind::StorageAccount => ("Microsoft.Storage", "storageAccounts"),
            ResourceKind::KeyVault => ("Microsoft.KeyVault", "vaults"),
            _ => return None,
        };
        Some(Self {
            resource_group: target.resource_group.clone(),
            provider_namespace: namespace.to_string(),
            parent_path: String::new(),
            resource_type: resource_type.to_string(),
            resource_name: target.name.clone(),
        })
    }

    /// `{namespace}/{parent_path}/{type}/{name}` with an empty parent path dropped.
    pub fn resource_path(&self) -> String {
        let parent = self.parent_path.trim_matches('/');
        if parent.is_empty() {
            format!(
                "{}/{}/{}",
                self.provider_namespace, self.resource_type, self.resource_name
            )
        } else {
            format!(
                "{}/{}/{}/{}",
                self.provider_namespace, parent, self.resource_type, self.resource_name
            )
        }
    }
}

// ── Access policies ───────────────────────────────────────────────────────────

/// Permission tokens of one access policy entry.
///
/// Equality ignores case and order but not multiplicity: the provider may
/// report `"Get"` where the request said `"get"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(Vec<String>);

impl PermissionSet {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionSet(tokens.into_iter().map(Into::into).collect())
    }

    /// Key permissions granted to the backend principal.
    pub fn backend_key_permissions() -> Self {
        Self::new(["update", "create", "get", "list", "encrypt", "decrypt"])
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn normalized(&self) -> Vec<String> {
        let mut out: Vec<String> = self.0.iter().map(|t| t.to_lowercase()).collect();
        out.sort();
        out
    }
}

impl PartialEq for PermissionSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.normalized() == other.normalized()
    }
}

impl Eq for PermissionSet {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicyEntry {
    pub tenant_id: String,
    pub object_id: String,
    pub keys: PermissionSet,
}

// ── Provider registration ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    NotRegistered,
    Registering,
    Registered,
    /// Anything else the provider reports (e.g. `Unregistering`), kept verbatim.
    Unknown(String),
}

impl RegistrationState {
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "NotRegistered" => RegistrationState::NotRegistered,
            "Registering" => RegistrationState::Registering,
            "Registered" => RegistrationState::Registered,
            other => RegistrationState::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::NotRegistered => write!(f, "NotRegistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
            RegistrationState::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}
