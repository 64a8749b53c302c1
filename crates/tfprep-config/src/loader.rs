use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawSettings, RawTuning};
use crate::request::RequestFields;

/// Timing and naming knobs for a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuning {
    /// Poll interval while a storage account create is in flight.
    pub storage_account_poll_interval: Duration,
    /// Poll interval while a key vault create is in flight.
    pub key_vault_poll_interval: Duration,
    /// Registration re-reads after the register call.
    pub registration_max_retries: u32,
    /// The i-th registration retry waits `i * registration_backoff_step`.
    pub registration_backoff_step: Duration,
    pub lock_name: String,
    pub lock_notes: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            storage_account_poll_interval: Duration::from_secs(30),
            key_vault_poll_interval: Duration::from_secs(5),
            registration_max_retries: 9,
            registration_backoff_step: Duration::from_secs(5),
            lock_name: "DoNotDelete".into(),
            lock_notes: "CanNotDelete".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Request fields from the file; flags and env are layered on top.
    pub azure: RequestFields,
    pub tuning: Tuning,
}

/// Load settings from `path`, or return defaults when no file is given.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };

    let path_display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path_display.clone(),
        source: e,
    })?;

    if content.trim().is_empty() {
        debug!("Settings file {} is empty, using defaults", path_display);
        return Ok(Settings::default());
    }

    let raw: RawSettings =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path_display.clone(),
            source: e,
        })?;
    debug!("Loaded settings from {}", path_display);

    Ok(Settings {
        azure: raw.azure,
        tuning: convert_tuning(raw.tuning, &path_display)?,
    })
}

fn convert_tuning(raw: RawTuning, path: &str) -> Result<Tuning, ConfigError> {
    let defaults = Tuning::default();
    let invalid = |message: String| ConfigError::Invalid {
        path: path.to_string(),
        message,
    };

    let positive_secs = |key: &str, value: Option<u64>, default: Duration| match value {
        Some(0) => Err(invalid(format!("{key} must be greater than zero"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    };

    let storage_account_poll_interval = positive_secs(
        "storage-account-poll-seconds",
        raw.storage_account_poll_seconds,
        defaults.storage_account_poll_interval,
    )?;
    let key_vault_poll_interval = positive_secs(
        "key-vault-poll-seconds",
        raw.key_vault_poll_seconds,
        defaults.key_vault_poll_interval,
    )?;
    let registration_backoff_step = positive_secs(
        "registration-backoff-seconds",
        raw.registration_backoff_seconds,
        defaults.registration_backoff_step,
    )?;

    let registration_max_retries = match raw.registration_max_retries {
        Some(0) => {
            return Err(invalid(
                "registration-max-retries must be at least 1".to_string(),
            ))
        }
        Some(n) => n,
        None => defaults.registration_max_retries,
    };

    let lock_name = match raw.lock_name {
        Some(name) if name.trim().is_empty() => {
            return Err(invalid("lock-name must not be empty".to_string()))
        }
        Some(name) => name,
        None => defaults.lock_name,
    };

    Ok(Tuning {
        storage_account_poll_interval,
        key_vault_poll_interval,
        registration_max_retries,
        registration_backoff_step,
        lock_name,
        lock_notes: raw.lock_notes.unwrap_or(defaults.lock_notes),
    })
}
