use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("{method} {url}: {message}")]
    Transport {
        method: &'static str,
        url: String,
        message: String,
    },

    /// The provider answered with a status the caller does not handle.
    #[error("{method} {url}: status {status} ({code}: {message})")]
    UnexpectedStatus {
        method: &'static str,
        url: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("decode {url}: {message}")]
    Decode { url: String, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    /// ARM error code carried by an unexpected-status error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            DriverError::UnexpectedStatus { code, .. } => Some(code),
            _ => None,
        }
    }
}
