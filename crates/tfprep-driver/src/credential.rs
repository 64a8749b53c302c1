//! Bearer-token acquisition for ARM and Microsoft Graph.
//!
//! Sources are tried in `DefaultAzureCredential` order: environment service
//! principal, managed identity, Azure CLI. Each can be excluded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tfprep_domain::CredentialOptions;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DriverError;

pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// v1-style resource URI for endpoints that take `resource=` rather than `scope=`.
fn resource_for(scope: &str) -> &str {
    scope.trim_end_matches(".default").trim_end_matches('/')
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn token(&self, scope: &str) -> Result<String, DriverError>;
}

#[derive(Default)]
struct TokenCache(Mutex<HashMap<String, (String, Instant)>>);

impl TokenCache {
    async fn get(&self, scope: &str) -> Option<String> {
        let guard = self.0.lock().await;
        guard
            .get(scope)
            .filter(|(_, expiry)| Instant::now() < *expiry)
            .map(|(tok, _)| tok.clone())
    }

    async fn put(&self, scope: &str, token: &str, expires_in: u64) {
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        self.0
            .lock()
            .await
            .insert(scope.to_string(), (token.to_string(), expiry));
    }
}

// ── Environment (service principal) ───────────────────────────────────────────

pub struct EnvironmentCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    login_base: String,
    client: reqwest::Client,
    cache: TokenCache,
}

impl EnvironmentCredential {
    /// Reads `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`; `AZURE_TENANT_ID`
    /// overrides `tenant_id` when set.
    pub fn from_env(tenant_id: &str, login_base: &str, client: reqwest::Client) -> Option<Self> {
        let client_id = std::env::var("AZURE_CLIENT_ID").ok()?;
        let client_secret = std::env::var("AZURE_CLIENT_SECRET").ok()?;
        let tenant_id = std::env::var("AZURE_TENANT_ID").unwrap_or_else(|_| tenant_id.to_string());
        Some(Self {
            tenant_id,
            client_id,
            client_secret,
            login_base: login_base.to_string(),
            client,
            cache: TokenCache::default(),
        })
    }
}

#[async_trait]
impl TokenProvider for EnvironmentCredential {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn token(&self, scope: &str) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get(scope).await {
            return Ok(tok);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DriverError::Auth(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Auth(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DriverError::Auth(format!("SP token: no access_token in response: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"].as_u64().unwrap_or(3600);
        self.cache.put(scope, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Managed Identity (IMDS) ───────────────────────────────────────────────────

pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, cache: TokenCache::default() }
    }
}

#[async_trait]
impl TokenProvider for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        "managed-identity"
    }

    async fn token(&self, scope: &str) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get(scope).await {
            return Ok(tok);
        }

        let resp: Value = self
            .client
            .get("http://169.254.169.254/metadata/identity/oauth2/token")
            .header("Metadata", "true")
            .query(&[("api-version", "2018-02-01"), ("resource", resource_for(scope))])
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| DriverError::Auth(format!("IMDS token request: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Auth(format!("IMDS token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| DriverError::Auth(format!("IMDS token: no access_token: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);
        self.cache.put(scope, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

/// Lifetime assumed when `az` reports no usable expiry.
const CLI_FALLBACK_LIFETIME: u64 = 300;

pub struct AzureCliCredential {
    tenant_id: String,
    program: String,
    cache: TokenCache,
}

impl AzureCliCredential {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self::with_program(tenant_id, "az")
    }

    /// Use a specific `az` executable instead of the one on `PATH`.
    pub fn with_program(tenant_id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            program: program.into(),
            cache: TokenCache::default(),
        }
    }
}

/// Seconds until the token in `az account get-access-token` output expires.
///
/// Newer CLIs report `expires_on` as epoch seconds; older ones only report
/// `expiresOn` as a local timestamp.
fn cli_expires_in(resp: &Value, now: i64) -> u64 {
    let epoch = match &resp["expires_on"] {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
    .or_else(|| {
        let raw = resp["expiresOn"].as_str()?;
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .ok()?
            .and_local_timezone(chrono::Local)
            .earliest()
            .map(|t| t.timestamp())
    });

    match epoch {
        Some(at) => u64::try_from(at - now).unwrap_or(0),
        None => CLI_FALLBACK_LIFETIME,
    }
}

#[async_trait]
impl TokenProvider for AzureCliCredential {
    fn name(&self) -> &'static str {
        "azure-cli"
    }

    async fn token(&self, scope: &str) -> Result<String, DriverError> {
        if let Some(tok) = self.cache.get(scope).await {
            return Ok(tok);
        }

        let output = tokio::process::Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                resource_for(scope),
                "--tenant",
                &self.tenant_id,
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| DriverError::Auth(format!("az CLI not found: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| DriverError::Auth(format!("az CLI output parse: {}", e)))?;
        let tok = resp["accessToken"]
            .as_str()
            .ok_or_else(|| DriverError::Auth("az CLI: no accessToken in output".into()))?
            .to_string();
        let expires_in = cli_expires_in(&resp, chrono::Utc::now().timestamp());
        debug!(scope, expires_in, "az CLI token acquired");
        self.cache.put(scope, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// Tries each source in order and returns the first token obtained.
pub struct ChainedCredential {
    sources: Vec<Box<dyn TokenProvider>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<Box<dyn TokenProvider>>) -> Self {
        Self { sources }
    }

    /// Build the default chain, skipping excluded sources.
    pub fn from_options(
        options: &CredentialOptions,
        tenant_id: &str,
        login_base: &str,
        client: &reqwest::Client,
    ) -> Self {
        let mut sources: Vec<Box<dyn TokenProvider>> = Vec::new();
        if !options.exclude_environment {
            match EnvironmentCredential::from_env(tenant_id, login_base, client.clone()) {
                Some(cred) => sources.push(Box::new(cred)),
                None => debug!("AZURE_CLIENT_ID/AZURE_CLIENT_SECRET not set, skipping environment credential"),
            }
        }
        if !options.exclude_msi {
            sources.push(Box::new(ManagedIdentityCredential::new(client.clone())));
        }
        if !options.exclude_cli {
            sources.push(Box::new(AzureCliCredential::new(tenant_id)));
        }
        Self { sources }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl TokenProvider for ChainedCredential {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn token(&self, scope: &str) -> Result<String, DriverError> {
        if self.sources.is_empty() {
            return Err(DriverError::Auth(
                "every credential source is excluded or unconfigured".into(),
            ));
        }

        let mut failures = Vec::new();
        for source in &self.sources {
            match source.token(scope).await {
                Ok(tok) => return Ok(tok),
                Err(e) => {
                    debug!(source = source.name(), error = %e, "credential source failed, trying next");
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }
        Err(DriverError::Auth(failures.join("; ")))
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn token(&self, _scope: &str) -> Result<String, DriverError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl TokenProvider for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn token(&self, _scope: &str) -> Result<String, DriverError> {
            Err(DriverError::Auth("nope".into()))
        }
    }

    #[test]
    fn resource_uri_from_scope() {
        assert_eq!(resource_for(MANAGEMENT_SCOPE), "https://management.azure.com");
        assert_eq!(resource_for(GRAPH_SCOPE), "https://graph.microsoft.com");
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_source() {
        let chain = ChainedCredential::new(vec![
            Box::new(Failing),
            Box::new(StaticToken("tok".into())),
        ]);
        assert_eq!(chain.token(MANAGEMENT_SCOPE).await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn chain_reports_every_failure() {
        let chain = ChainedCredential::new(vec![Box::new(Failing), Box::new(Failing)]);
        let err = chain.token(MANAGEMENT_SCOPE).await.unwrap_err();
        assert_eq!(err.to_string().matches("failing:").count(), 2, "got: {}", err);
    }

    #[tokio::test]
    async fn empty_chain_is_an_auth_error() {
        let chain = ChainedCredential::new(vec![]);
        assert!(matches!(chain.token(GRAPH_SCOPE).await, Err(DriverError::Auth(_))));
    }

    #[test]
    fn cli_expiry_prefers_epoch_seconds() {
        let now = 1_700_000_000;
        assert_eq!(cli_expires_in(&serde_json::json!({ "expires_on": now + 3599 }), now), 3599);
        assert_eq!(cli_expires_in(&serde_json::json!({ "expires_on": "1700001800" }), now), 1800);
        assert_eq!(cli_expires_in(&serde_json::json!({ "expires_on": now - 10 }), now), 0);
        assert_eq!(cli_expires_in(&serde_json::json!({}), now), CLI_FALLBACK_LIFETIME);
    }

    #[test]
    fn cli_expiry_reads_local_timestamp() {
        let at = chrono::Local::now() + chrono::Duration::hours(1);
        let raw = at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        let secs = cli_expires_in(&serde_json::json!({ "expiresOn": raw }), chrono::Utc::now().timestamp());
        assert!((3590..=3600).contains(&secs), "got {secs}");
    }

    /// Writes an `az` stand-in that logs each invocation and prints a token.
    #[cfg(unix)]
    fn fake_az(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("invocations");
        let script = dir.join("az");
        let body = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\necho '{{\"accessToken\": \"cli-token\", \"expires_on\": 4102444800}}'\n",
            log.display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cli_token_is_cached_per_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = fake_az(dir.path());
        let cred = AzureCliCredential::with_program("tenant", script.to_string_lossy());

        for _ in 0..5 {
            assert_eq!(cred.token(MANAGEMENT_SCOPE).await.unwrap(), "cli-token");
        }
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 1, "az ran more than once:\n{calls}");
        assert!(calls.contains("--resource https://management.azure.com --tenant tenant"));

        cred.token(GRAPH_SCOPE).await.unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 2);
    }

    #[test]
    fn exclusions_shape_the_chain() {
        let client = reqwest::Client::new();
        let options = CredentialOptions {
            exclude_cli: false,
            exclude_environment: true,
            exclude_msi: true,
        };
        let chain = ChainedCredential::from_options(&options, "tenant", "https://login", &client);
        assert_eq!(chain.source_names(), vec!["azure-cli"]);

        let options = CredentialOptions {
            exclude_cli: true,
            exclude_environment: true,
            exclude_msi: false,
        };
        let chain = ChainedCredential::from_options(&options, "tenant", "https://login", &client);
        assert_eq!(chain.source_names(), vec!["managed-identity"]);
    }
}
