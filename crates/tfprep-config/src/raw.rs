use serde::{Deserialize, Serialize};

use crate::request::RequestFields;

/// Raw YAML representation of the settings file.
///
/// ```yaml
/// azure:
///   subscription-id: ...
///   resource-group-name: rg-dev-we-tfstate
/// tuning:
///   storage-account-poll-seconds: 30
///   registration-max-retries: 9
/// ```
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawSettings {
    pub azure: RequestFields,
    pub tuning: RawTuning,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct RawTuning {
    pub storage_account_poll_seconds: Option<u64>,
    pub key_vault_poll_seconds: Option<u64>,
    pub registration_max_retries: Option<u32>,
    pub registration_backoff_seconds: Option<u64>,
    pub lock_name: Option<String>,
    pub lock_notes: Option<String>,
}
