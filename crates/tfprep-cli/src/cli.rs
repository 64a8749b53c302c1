use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tfprep_config::RequestFields;

#[derive(Debug, Parser)]
#[command(
    name = "tf-prepare",
    about = "Prepare a cloud subscription to hold Terraform remote state",
    version
)]
pub struct Cli {
    /// YAML settings file with request defaults and tuning.
    #[arg(long, env = "TF_PREPARE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Emit the run report as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision the Azure state backend (resource group, storage, key vault).
    Azure(AzureArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Every field is optional on the command line so the settings file can
/// supply it; the merged request is checked for completeness afterwards.
#[derive(Debug, Default, Args)]
pub struct AzureArgs {
    /// Object id of the principal granted key access. Defaults to the signed-in principal.
    #[arg(long, env = "AZURE_SERVICE_PRINCIPAL_OBJECT_ID")]
    pub service_principal_object_id: Option<String>,

    #[arg(long, env = "AZURE_SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    #[arg(long, env = "AZURE_TENANT_ID")]
    pub tenant_id: Option<String>,

    #[arg(long, env = "AZURE_RESOURCE_GROUP_NAME")]
    pub resource_group_name: Option<String>,

    #[arg(long, env = "AZURE_RESOURCE_GROUP_LOCATION")]
    pub resource_group_location: Option<String>,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_NAME")]
    pub storage_account_name: Option<String>,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_CONTAINER")]
    pub storage_account_container: Option<String>,

    #[arg(long, env = "AZURE_KEYVAULT_NAME")]
    pub keyvault_name: Option<String>,

    #[arg(long, env = "AZURE_KEYVAULT_KEY_NAME")]
    pub keyvault_key_name: Option<String>,

    /// Attach CanNotDelete locks to the storage account and key vault [default: true].
    #[arg(long, env = "AZURE_RESOURCE_LOCKS", action = ArgAction::Set)]
    pub resource_locks: Option<bool>,

    /// Skip the Azure CLI credential [default: false].
    #[arg(long, env = "AZURE_EXCLUDE_CLI_CREDENTIAL", action = ArgAction::Set)]
    pub exclude_cli_credential: Option<bool>,

    /// Skip the environment service principal credential [default: true].
    #[arg(long, env = "AZURE_EXCLUDE_ENVIRONMENT_CREDENTIAL", action = ArgAction::Set)]
    pub exclude_environment_credential: Option<bool>,

    /// Skip the managed identity credential [default: true].
    #[arg(long, env = "AZURE_EXCLUDE_MSI_CREDENTIAL", action = ArgAction::Set)]
    pub exclude_msi_credential: Option<bool>,
}

impl AzureArgs {
    pub fn into_fields(self) -> RequestFields {
        RequestFields {
            service_principal_object_id: self.service_principal_object_id,
            subscription_id: self.subscription_id,
            tenant_id: self.tenant_id,
            resource_group_name: self.resource_group_name,
            resource_group_location: self.resource_group_location,
            storage_account_name: self.storage_account_name,
            storage_account_container: self.storage_account_container,
            key_vault_name: self.keyvault_name,
            key_vault_key_name: self.keyvault_key_name,
            resource_locks: self.resource_locks,
            exclude_cli_credential: self.exclude_cli_credential,
            exclude_environment_credential: self.exclude_environment_credential,
            exclude_msi_credential: self.exclude_msi_credential,
        }
    }
}
