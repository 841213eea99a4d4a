//! Error types shared by every convergence component.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while converging a resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A cross-reference (e.g. a network named by `name/account/region`)
    /// could not be resolved. Fatal for the current attempt.
    #[error("cannot resolve {kind} reference {reference}")]
    ReferenceResolution { kind: String, reference: String },

    /// The provider or orchestrator could not be reached.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The orchestrator refused or failed the operation.
    #[error("operation rejected: {0}")]
    OperationRejected(String),

    /// No terminal status arrived within the budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The declared spec or observed state is malformed.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Status, lock or resource store failure.
    #[error("store: {0}")]
    Store(String),
}

impl Error {
    pub fn reference(kind: impl Into<String>, reference: impl Into<String>) -> Self {
        Error::ReferenceResolution {
            kind: kind.into(),
            reference: reference.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ProviderUnavailable(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_client_error() => Error::OperationRejected(e.to_string()),
            _ if e.is_decode() => Error::OperationRejected(e.to_string()),
            _ => Error::ProviderUnavailable(e.to_string()),
        }
    }
}

/// Result type for convergence operations.
pub type Result<T> = std::result::Result<T, Error>;
