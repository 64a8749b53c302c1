use std::fmt::Display;

use tfprep_domain::ValidationErrors;
use tfprep_driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{operation} {resource}: {source}")]
    Transport {
        operation: &'static str,
        resource: String,
        #[source]
        source: DriverError,
    },

    #[error("provider {namespace}: registration not completed after {retries} retries")]
    RegistrationTimeout { namespace: String, retries: u32 },

    #[error("provider {namespace}: unknown registration state '{state}'")]
    UnknownRegistrationState { namespace: String, state: String },

    #[error("{resource}: name not available ({reason}): {message}")]
    NameUnavailable {
        resource: String,
        reason: String,
        message: String,
    },

    #[error("{operation} {resource}: operation failed: {detail}")]
    OperationFailed {
        operation: &'static str,
        resource: String,
        detail: String,
    },

    #[error("cancelled during {operation}")]
    Cancelled { operation: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    pub(crate) fn transport(operation: &'static str, resource: impl Display, source: DriverError) -> Self {
        ReconcileError::Transport {
            operation,
            resource: resource.to_string(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcileError::Cancelled { .. })
    }
}
