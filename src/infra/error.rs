//! Error types for the gateway infrastructure.

use thiserror::Error;

use crate::domain::{DomainError, ErrorCode};

/// Errors that can occur inside the gateway core and its collaborators.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Domain value failed validation
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Capability does not exist in the registry
    #[error("capability not found: {capability_id}")]
    ManifestNotFound { capability_id: String },

    /// Capability registry could not be reached and no cached entry exists
    #[error("capability registry unreachable: {0}")]
    RegistryUnreachable(String),

    /// Policy bundle store could not be reached
    #[error("policy store unreachable: {0}")]
    PolicyStoreUnavailable(String),

    /// Approval store could not be reached
    #[error("approval store unreachable: {0}")]
    ApprovalStoreUnavailable(String),

    /// Budget counter store could not be reached
    #[error("budget counters unreachable: {0}")]
    CounterUnavailable(String),

    /// Idempotency store could not be reached
    #[error("idempotency store unreachable: {0}")]
    IdempotencyUnavailable(String),

    /// Timed out waiting on the single-flight barrier
    #[error("timed out waiting for in-flight execution with the same idempotency key")]
    BarrierTimeout,

    /// The in-flight execution was abandoned without producing a receipt
    #[error("in-flight execution with the same idempotency key was abandoned")]
    BarrierClosed,

    /// Credential vault could not resolve a secret reference
    #[error("vault error: {0}")]
    VaultUnavailable(String),

    /// Receipt, decision, outcome, or stats store failure
    #[error("store error: {0}")]
    StoreUnavailable(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The taxonomy code this fault surfaces as at the gateway boundary.
    pub fn boundary_code(&self) -> ErrorCode {
        match self {
            GatewayError::Domain(_) => ErrorCode::ParamsSchemaViolation,
            GatewayError::ManifestNotFound { .. } => ErrorCode::CapabilityNotPublished,
            GatewayError::RegistryUnreachable(_)
            | GatewayError::PolicyStoreUnavailable(_)
            | GatewayError::ApprovalStoreUnavailable(_)
            | GatewayError::CounterUnavailable(_)
            | GatewayError::IdempotencyUnavailable(_)
            | GatewayError::BarrierTimeout
            | GatewayError::BarrierClosed
            | GatewayError::VaultUnavailable(_)
            | GatewayError::StoreUnavailable(_)
            | GatewayError::Configuration(_)
            | GatewayError::Internal(_) => ErrorCode::GatewayError,
        }
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
