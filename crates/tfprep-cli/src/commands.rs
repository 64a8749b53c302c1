use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tfprep_config::{load_settings, RequestFields};
use tfprep_driver::{AzureProvider, AzureProviderConfig};
use tfprep_reconciler::{cancel_pair, Orchestrator};
use tracing::warn;

use crate::output;

pub async fn azure(config: Option<PathBuf>, flags: RequestFields, json: bool) -> Result<()> {
    let settings = load_settings(config.as_deref()).context("Failed to load settings")?;
    let request = settings
        .azure
        .overlay(flags)
        .into_request()
        .context("Incomplete provisioning request")?;

    let provider = Arc::new(
        AzureProvider::new(AzureProviderConfig {
            subscription_id: request.subscription_id.clone(),
            tenant_id: request.tenant_id.clone(),
            credentials: request.credentials.clone(),
        })
        .context("Failed to initialise Azure provider")?,
    );

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });

    let orchestrator = Orchestrator::new(provider.clone(), provider, settings.tuning, token);
    let report = orchestrator.run(&request).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        print!("{}", output::render_report(&report));
    }
    Ok(())
}
