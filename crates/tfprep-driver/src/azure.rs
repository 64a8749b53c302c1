use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tfprep_domain::{
    AccessPolicyEntry, CredentialOptions, PermissionSet, RegistrationState, ResourceIdentity,
    ResourceKind,
};
use tracing::debug;

use crate::credential::{ChainedCredential, TokenProvider, GRAPH_SCOPE, MANAGEMENT_SCOPE};
use crate::error::DriverError;
use crate::provider::{
    ExistenceOutcome, IdentityLookup, NameAvailability, OperationHandle, OperationStatus, Provider,
};

const RESOURCES_API: &str = "2021-04-01";
const STORAGE_API: &str = "2023-01-01";
const KEY_VAULT_API: &str = "2023-07-01";
const LOCKS_API: &str = "2016-09-01";

/// ARM error codes that mean "this exact resource is absent".
///
/// `ResourceGroupNotFound` and `ParentResourceNotFound` are deliberately
/// absent: a missing parent is a broken precondition, not a create path.
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "ContainerNotFound", "LockNotFound", "NotFound"];

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AzureProviderConfig {
    pub subscription_id: String,
    pub tenant_id: String,
    pub credentials: CredentialOptions,
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    management: String,
    login: String,
    graph: String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            management: "https://management.azure.com".into(),
            login: "https://login.microsoftonline.com".into(),
            graph: "https://graph.microsoft.com".into(),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

struct ArmResponse {
    status: u16,
    body: Value,
    /// `Azure-AsyncOperation`, falling back to `Location`.
    operation_url: Option<String>,
}

impl ArmResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Extract `(code, message)` from an ARM error body.
pub(crate) fn arm_error(body: &Value) -> (String, String) {
    let err = body
        .get("error")
        .or_else(|| body.get("Error"))
        .unwrap_or(body);
    let code = err["code"].as_str().unwrap_or("Unknown").to_string();
    let message = err["message"].as_str().unwrap_or("unknown error").to_string();
    (code, message)
}

fn unexpected(method: &'static str, url: &str, resp: &ArmResponse) -> DriverError {
    let (code, message) = arm_error(&resp.body);
    DriverError::UnexpectedStatus {
        method,
        url: url.to_string(),
        status: resp.status,
        code,
        message,
    }
}

/// Map a read response onto the three existence outcomes.
/// `kind` matters only for vault keys: their parent vault has already been
/// confirmed, so every 404 on the keys endpoint means the key is missing.
fn classify(kind: ResourceKind, method: &'static str, url: &str, resp: ArmResponse) -> ExistenceOutcome {
    if resp.is_success() {
        return ExistenceOutcome::Exists;
    }
    if resp.status == 404 {
        if resp.body.is_null() || kind == ResourceKind::KeyVaultKey {
            return ExistenceOutcome::NotFound;
        }
        let (code, _) = arm_error(&resp.body);
        if NOT_FOUND_CODES.contains(&code.as_str()) {
            return ExistenceOutcome::NotFound;
        }
    }
    ExistenceOutcome::TransportError(unexpected(method, url, &resp))
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// Azure Resource Manager REST implementation of [`Provider`].
pub struct AzureProvider {
    config: AzureProviderConfig,
    client: reqwest::Client,
    token: Box<dyn TokenProvider>,
    base: BaseUrls,
}

impl AzureProvider {
    /// Build a provider whose tokens come from the credential chain
    /// selected by `config.credentials`.
    pub fn new(config: AzureProviderConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| DriverError::Internal(format!("http client: {}", e)))?;
        let base = BaseUrls::default();

        let chain =
            ChainedCredential::from_options(&config.credentials, &config.tenant_id, &base.login, &client);
        if chain.source_names().is_empty() {
            return Err(DriverError::Auth(
                "every credential source is excluded or unconfigured".into(),
            ));
        }
        debug!(sources = ?chain.source_names(), "Azure credential chain");

        Ok(Self { config, client, token: Box::new(chain), base })
    }

    /// Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(config: AzureProviderConfig, token: &str, base: BaseUrls) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: Box::new(crate::credential::StaticToken(token.to_string())),
            base,
        }
    }

    // ── URLs ──────────────────────────────────────────────────────────────────

    fn subscription_url(&self) -> String {
        format!("{}/subscriptions/{}", self.base.management, self.config.subscription_id)
    }

    fn group_url(&self, resource_group: &str) -> String {
        format!("{}/resourcegroups/{}", self.subscription_url(), resource_group)
    }

    /// Path of a resource without the `api-version` query.
    fn resource_path(&self, identity: &ResourceIdentity) -> Result<String, DriverError> {
        let group = self.group_url(&identity.resource_group);
        let parent = || {
            identity.parent_name().ok_or_else(|| {
                DriverError::Internal(format!("{} has no parent resource", identity))
            })
        };
        Ok(match identity.kind {
            ResourceKind::ResourceGroup => group,
            ResourceKind::StorageAccount => format!(
                "{}/providers/Microsoft.Storage/storageAccounts/{}",
                group, identity.name
            ),
            ResourceKind::BlobContainer => format!(
                "{}/providers/Microsoft.Storage/storageAccounts/{}/blobServices/default/containers/{}",
                group,
                parent()?,
                identity.name
            ),
            ResourceKind::KeyVault => {
                format!("{}/providers/Microsoft.KeyVault/vaults/{}", group, identity.name)
            }
            ResourceKind::KeyVaultKey => format!(
                "{}/providers/Microsoft.KeyVault/vaults/{}/keys/{}",
                group,
                parent()?,
                identity.name
            ),
            ResourceKind::ResourceLock => {
                let scope = identity.lock_scope().ok_or_else(|| {
                    DriverError::Internal(format!("{} has no lock scope", identity))
                })?;
                format!(
                    "{}/providers/{}/providers/Microsoft.Authorization/locks/{}",
                    group,
                    scope.resource_path(),
                    identity.name
                )
            }
        })
    }

    fn resource_url(&self, identity: &ResourceIdentity) -> Result<String, DriverError> {
        let api = match identity.kind {
            ResourceKind::ResourceGroup => RESOURCES_API,
            ResourceKind::StorageAccount | ResourceKind::BlobContainer => STORAGE_API,
            ResourceKind::KeyVault | ResourceKind::KeyVaultKey => KEY_VAULT_API,
            ResourceKind::ResourceLock => LOCKS_API,
        };
        Ok(format!("{}?api-version={}", self.resource_path(identity)?, api))
    }

    fn provider_url(&self, namespace: &str, action: Option<&str>) -> String {
        let suffix = action.map(|a| format!("/{}", a)).unwrap_or_default();
        format!(
            "{}/providers/{}{}?api-version={}",
            self.subscription_url(),
            namespace,
            suffix,
            RESOURCES_API
        )
    }

    // ── HTTP ──────────────────────────────────────────────────────────────────

    async fn send(
        &self,
        verb: &'static str,
        url: &str,
        body: Option<&Value>,
        scope: &str,
    ) -> Result<ArmResponse, DriverError> {
        let token = self.token.token(scope).await?;
        let method = match verb {
            "PUT" => reqwest::Method::PUT,
            "POST" => reqwest::Method::POST,
            "HEAD" => reqwest::Method::HEAD,
            _ => reqwest::Method::GET,
        };
        debug!(url, method = verb, "Azure request");

        let mut req = self.client.request(method, url).bearer_auth(&token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| DriverError::Transport {
            method: verb,
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status().as_u16();
        let operation_url = resp
            .headers()
            .get("Azure-AsyncOperation")
            .or_else(|| resp.headers().get("Location"))
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(ArmResponse { status, body, operation_url })
    }

    async fn arm_get(&self, url: &str) -> Result<ArmResponse, DriverError> {
        self.send("GET", url, None, MANAGEMENT_SCOPE).await
    }

    async fn arm_head(&self, url: &str) -> Result<ArmResponse, DriverError> {
        self.send("HEAD", url, None, MANAGEMENT_SCOPE).await
    }

    async fn arm_put(&self, url: &str, body: &Value) -> Result<ArmResponse, DriverError> {
        self.send("PUT", url, Some(body), MANAGEMENT_SCOPE).await
    }

    async fn arm_post(&self, url: &str, body: &Value) -> Result<ArmResponse, DriverError> {
        self.send("POST", url, Some(body), MANAGEMENT_SCOPE).await
    }

    /// PUT that must answer 2xx; returns the body.
    async fn put_ok(&self, url: &str, body: &Value) -> Result<Value, DriverError> {
        let resp = self.arm_put(url, body).await?;
        if !resp.is_success() {
            return Err(unexpected("PUT", url, &resp));
        }
        Ok(resp.body)
    }

    /// PUT a long-running create and turn the answer into a handle.
    async fn begin_create(
        &self,
        identity: &ResourceIdentity,
        body: &Value,
    ) -> Result<OperationHandle, DriverError> {
        let url = self.resource_url(identity)?;
        let resp = self.arm_put(&url, body).await?;
        match (resp.status, resp.operation_url) {
            (202, Some(op_url)) | (201, Some(op_url)) => {
                Ok(OperationHandle::pending(identity.clone(), op_url))
            }
            // Accepted without a status URL: poll the resource itself.
            (202, None) => Ok(OperationHandle::pending(identity.clone(), url)),
            (200, _) | (201, None) => Ok(OperationHandle::completed(identity.clone(), resp.body)),
            (status, operation_url) => Err(unexpected(
                "PUT",
                &url,
                &ArmResponse { status, body: resp.body, operation_url },
            )),
        }
    }

    /// `(namespace, resource type, api version)` for a global name check.
    fn name_check_request(
        identity: &ResourceIdentity,
    ) -> Result<(&'static str, &'static str, &'static str), DriverError> {
        match identity.kind {
            ResourceKind::StorageAccount => {
                Ok(("Microsoft.Storage", "Microsoft.Storage/storageAccounts", STORAGE_API))
            }
            ResourceKind::KeyVault => Ok(("Microsoft.KeyVault", "Microsoft.KeyVault/vaults", KEY_VAULT_API)),
            other => Err(DriverError::Internal(format!(
                "name availability is not defined for {}",
                other
            ))),
        }
    }
}

fn parse_access_policies(body: &Value) -> Vec<AccessPolicyEntry> {
    body["properties"]["accessPolicies"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|e| AccessPolicyEntry {
                    tenant_id: e["tenantId"].as_str().unwrap_or_default().to_string(),
                    object_id: e["objectId"].as_str().unwrap_or_default().to_string(),
                    keys: PermissionSet::new(
                        e["permissions"]["keys"]
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(Value::as_str),
                    ),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn registration_from(url: &str, body: &Value) -> Result<RegistrationState, DriverError> {
    body["registrationState"]
        .as_str()
        .map(RegistrationState::from_provider)
        .ok_or_else(|| DriverError::Decode {
            url: url.to_string(),
            message: "missing registrationState".into(),
        })
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn probe(&self, identity: &ResourceIdentity) -> ExistenceOutcome {
        let url = match self.resource_url(identity) {
            Ok(url) => url,
            Err(e) => return ExistenceOutcome::TransportError(e),
        };

        if identity.kind == ResourceKind::ResourceGroup {
            return match self.arm_head(&url).await {
                Ok(resp) if resp.status == 204 || resp.status == 200 => ExistenceOutcome::Exists,
                Ok(resp) if resp.status == 404 => ExistenceOutcome::NotFound,
                Ok(resp) => ExistenceOutcome::TransportError(unexpected("HEAD", &url, &resp)),
                Err(e) => ExistenceOutcome::TransportError(e),
            };
        }

        match self.arm_get(&url).await {
            Ok(resp) => classify(identity.kind, "GET", &url, resp),
            Err(e) => ExistenceOutcome::TransportError(e),
        }
    }

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<(), DriverError> {
        let url = self.resource_url(&ResourceIdentity::resource_group(name))?;
        self.put_ok(&url, &json!({ "location": location })).await?;
        Ok(())
    }

    async fn registration_state(&self, namespace: &str) -> Result<RegistrationState, DriverError> {
        let url = self.provider_url(namespace, None);
        let resp = self.arm_get(&url).await?;
        if !resp.is_success() {
            return Err(unexpected("GET", &url, &resp));
        }
        registration_from(&url, &resp.body)
    }

    async fn register_provider(&self, namespace: &str) -> Result<RegistrationState, DriverError> {
        let url = self.provider_url(namespace, Some("register"));
        let resp = self.arm_post(&url, &json!({})).await?;
        if !resp.is_success() {
            return Err(unexpected("POST", &url, &resp));
        }
        registration_from(&url, &resp.body)
    }

    async fn check_name_availability(
        &self,
        identity: &ResourceIdentity,
    ) -> Result<NameAvailability, DriverError> {
        let (namespace, resource_type, api) = Self::name_check_request(identity)?;
        let url = format!(
            "{}/providers/{}/checkNameAvailability?api-version={}",
            self.subscription_url(),
            namespace,
            api
        );
        let resp = self
            .arm_post(&url, &json!({ "name": identity.name, "type": resource_type }))
            .await?;
        if !resp.is_success() {
            return Err(unexpected("POST", &url, &resp));
        }

        let available = resp.body["nameAvailable"].as_bool().ok_or_else(|| DriverError::Decode {
            url: url.clone(),
            message: "missing nameAvailable".into(),
        })?;
        Ok(NameAvailability {
            available,
            reason: resp.body["reason"].as_str().map(str::to_string),
            message: resp.body["message"].as_str().map(str::to_string),
        })
    }

    async fn operation_status(&self, handle: &OperationHandle) -> Result<OperationStatus, DriverError> {
        if let Some(body) = &handle.completed {
            return Ok(OperationStatus::Succeeded(body.clone()));
        }

        let resp = self.arm_get(&handle.token).await?;
        if !resp.is_success() {
            return Err(unexpected("GET", &handle.token, &resp));
        }

        // Azure-AsyncOperation bodies carry a status field.
        if let Some(status) = resp.body.get("status").and_then(Value::as_str) {
            return match status {
                "Succeeded" => {
                    let url = self.resource_url(&handle.resource)?;
                    let created = self.arm_get(&url).await?;
                    if !created.is_success() {
                        return Err(unexpected("GET", &url, &created));
                    }
                    Ok(OperationStatus::Succeeded(created.body))
                }
                "Failed" | "Canceled" => {
                    let (code, message) = arm_error(&resp.body);
                    Ok(OperationStatus::Failed(format!("{} ({}: {})", status, code, message)))
                }
                _ => Ok(OperationStatus::InProgress),
            };
        }

        // Location polling: 202 while running, 200 with the resource when done.
        if resp.status == 202 {
            Ok(OperationStatus::InProgress)
        } else {
            Ok(OperationStatus::Succeeded(resp.body))
        }
    }

    async fn begin_create_storage_account(
        &self,
        account: &ResourceIdentity,
        location: &str,
    ) -> Result<OperationHandle, DriverError> {
        let body = json!({
            "location": location,
            "sku": { "name": "Standard_GRS", "tier": "Standard" },
            "kind": "StorageV2",
            "properties": {
                "accessTier": "Hot",
                "allowBlobPublicAccess": false,
                "minimumTlsVersion": "TLS1_2"
            }
        });
        self.begin_create(account, &body).await
    }

    async fn create_blob_container(&self, container: &ResourceIdentity) -> Result<(), DriverError> {
        let url = self.resource_url(container)?;
        self.put_ok(&url, &json!({ "properties": {} })).await?;
        Ok(())
    }

    async fn begin_create_key_vault(
        &self,
        vault: &ResourceIdentity,
        location: &str,
        tenant_id: &str,
    ) -> Result<OperationHandle, DriverError> {
        let body = json!({
            "location": location,
            "properties": {
                "tenantId": tenant_id,
                "sku": { "family": "A", "name": "standard" },
                "accessPolicies": []
            }
        });
        self.begin_create(vault, &body).await
    }

    async fn access_policies(&self, vault: &ResourceIdentity) -> Result<Vec<AccessPolicyEntry>, DriverError> {
        let url = self.resource_url(vault)?;
        let resp = self.arm_get(&url).await?;
        if !resp.is_success() {
            return Err(unexpected("GET", &url, &resp));
        }
        Ok(parse_access_policies(&resp.body))
    }

    async fn add_access_policy(
        &self,
        vault: &ResourceIdentity,
        entry: &AccessPolicyEntry,
    ) -> Result<(), DriverError> {
        let url = format!(
            "{}/accessPolicies/add?api-version={}",
            self.resource_path(vault)?,
            KEY_VAULT_API
        );
        let body = json!({
            "properties": {
                "accessPolicies": [{
                    "tenantId": entry.tenant_id,
                    "objectId": entry.object_id,
                    "permissions": { "keys": entry.keys.tokens() }
                }]
            }
        });
        self.put_ok(&url, &body).await?;
        Ok(())
    }

    async fn create_key(&self, key: &ResourceIdentity) -> Result<(), DriverError> {
        let url = self.resource_url(key)?;
        let body = json!({
            "properties": {
                "kty": "RSA",
                "keySize": 2048,
                "keyOps": ["encrypt", "decrypt"],
                "attributes": { "enabled": true }
            }
        });
        self.put_ok(&url, &body).await?;
        Ok(())
    }

    async fn create_lock(&self, lock: &ResourceIdentity, notes: &str) -> Result<(), DriverError> {
        let url = self.resource_url(lock)?;
        let body = json!({
            "properties": { "level": "CanNotDelete", "notes": notes }
        });
        self.put_ok(&url, &body).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityLookup for AzureProvider {
    async fn current_principal_id(&self) -> Result<String, DriverError> {
        let url = format!("{}/v1.0/me", self.base.graph);
        let resp = self.send("GET", &url, None, GRAPH_SCOPE).await?;
        if !resp.is_success() {
            return Err(unexpected("GET", &url, &resp));
        }
        resp.body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Decode { url, message: "missing id".into() })
    }
}
