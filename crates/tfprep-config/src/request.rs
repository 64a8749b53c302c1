use serde::{Deserialize, Serialize};
use tfprep_domain::{CredentialOptions, ProvisioningRequest};

use crate::error::ConfigError;

/// Request fields as supplied by one source (settings file, flags, env).
/// Every field is optional here; [`RequestFields::into_request`] decides
/// what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct RequestFields {
    pub service_principal_object_id: Option<String>,
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub resource_group_name: Option<String>,
    pub resource_group_location: Option<String>,
    pub storage_account_name: Option<String>,
    pub storage_account_container: Option<String>,
    #[serde(rename = "keyvault-name")]
    pub key_vault_name: Option<String>,
    #[serde(rename = "keyvault-key-name")]
    pub key_vault_key_name: Option<String>,
    pub resource_locks: Option<bool>,
    pub exclude_cli_credential: Option<bool>,
    pub exclude_environment_credential: Option<bool>,
    pub exclude_msi_credential: Option<bool>,
}

impl RequestFields {
    /// Layer `over` on top of `self`; any field set in `over` wins.
    pub fn overlay(self, over: RequestFields) -> RequestFields {
        RequestFields {
            service_principal_object_id: over
                .service_principal_object_id
                .or(self.service_principal_object_id),
            subscription_id: over.subscription_id.or(self.subscription_id),
            tenant_id: over.tenant_id.or(self.tenant_id),
            resource_group_name: over.resource_group_name.or(self.resource_group_name),
            resource_group_location: over.resource_group_location.or(self.resource_group_location),
            storage_account_name: over.storage_account_name.or(self.storage_account_name),
            storage_account_container: over
                .storage_account_container
                .or(self.storage_account_container),
            key_vault_name: over.key_vault_name.or(self.key_vault_name),
            key_vault_key_name: over.key_vault_key_name.or(self.key_vault_key_name),
            resource_locks: over.resource_locks.or(self.resource_locks),
            exclude_cli_credential: over.exclude_cli_credential.or(self.exclude_cli_credential),
            exclude_environment_credential: over
                .exclude_environment_credential
                .or(self.exclude_environment_credential),
            exclude_msi_credential: over.exclude_msi_credential.or(self.exclude_msi_credential),
        }
    }

    /// Build the request, reporting every missing required field at once.
    ///
    /// Name grammars are not checked here; that happens in
    /// [`tfprep_domain::validate_request`] before the first remote call.
    pub fn into_request(self) -> Result<ProvisioningRequest, ConfigError> {
        let mut missing = Vec::new();
        let mut take = |field: &'static str, value: Option<String>| -> String {
            match value {
                Some(v) if !v.is_empty() => v,
                _ => {
                    missing.push(field);
                    String::new()
                }
            }
        };

        let subscription_id = take("subscription-id", self.subscription_id);
        let tenant_id = take("tenant-id", self.tenant_id);
        let resource_group_name = take("resource-group-name", self.resource_group_name);
        let resource_group_location = take("resource-group-location", self.resource_group_location);
        let storage_account_name = take("storage-account-name", self.storage_account_name);
        let storage_account_container =
            take("storage-account-container", self.storage_account_container);
        let key_vault_name = take("keyvault-name", self.key_vault_name);
        let key_vault_key_name = take("keyvault-key-name", self.key_vault_key_name);

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        let defaults = CredentialOptions::default();
        Ok(ProvisioningRequest {
            subscription_id,
            tenant_id,
            resource_group_name,
            resource_group_location,
            storage_account_name,
            storage_account_container,
            key_vault_name,
            key_vault_key_name,
            service_principal_object_id: self
                .service_principal_object_id
                .filter(|s| !s.is_empty()),
            resource_locks: self.resource_locks.unwrap_or(true),
            credentials: CredentialOptions {
                exclude_cli: self.exclude_cli_credential.unwrap_or(defaults.exclude_cli),
                exclude_environment: self
                    .exclude_environment_credential
                    .unwrap_or(defaults.exclude_environment),
                exclude_msi: self.exclude_msi_credential.unwrap_or(defaults.exclude_msi),
            },
        })
    }
}
