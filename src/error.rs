//! Error types for boxgate

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the gateway.
///
/// Persistence-layer faults are wrapped here before they reach any
/// caller; raw driver errors never leave the store module.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Token failed verification. Deliberately carries no reason:
    /// the rejection cause is logged, not returned.
    #[error("invalid token")]
    Unauthorized,

    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Provisioning timed out after {0:?}")]
    ProvisioningTimeout(Duration),

    #[error("Connection pool exhausted after {0:?}")]
    PoolExhausted(Duration),

    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable classification string for logs, metrics, and API error bodies.
    pub fn classification(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::ProvisioningFailed(_) => "provisioning_failed",
            GatewayError::ProvisioningTimeout(_) => "provisioning_timeout",
            GatewayError::PoolExhausted(_) => "pool_exhausted",
            GatewayError::DuplicateSession(_) => "duplicate_session",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::StoreUnavailable(_) => "store_unavailable",
            GatewayError::Config(_) => "config_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller is at fault (4xx-class) as opposed to the system.
    pub fn caller_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::Unauthorized
                | GatewayError::DuplicateSession(_)
                | GatewayError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
