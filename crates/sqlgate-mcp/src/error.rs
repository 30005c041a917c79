//! Error types for the gateway.

use sqlgate_auth::AuthError;
use sqlgate_core::{CoreError, VendorKind};
use sqlgate_store::StoreError;
use thiserror::Error;

use crate::protocol::error_codes;

/// Errors that can occur while serving a message.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to start a transport.
    #[error("failed to start gateway: {0}")]
    StartupFailed(String),

    /// Unknown JSON-RPC method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Malformed or schema-violating parameters.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Full-name parsing or backend configuration decoding.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Resource not found: {name}")]
    ResourceNotFound { name: String },

    /// The server record disappeared from the store.
    #[error("Server not found: {server_id}")]
    ServerNotFound { server_id: String },

    /// Credential or scope check failed.
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    /// Opening a backend connection failed.
    #[error("failed to connect to {server_id} ({vendor}): {reason}")]
    Connection {
        server_id: String,
        vendor: VendorKind,
        reason: String,
    },

    /// The backend rejected or failed the query.
    #[error("{vendor} query failed: {reason}")]
    Query { vendor: VendorKind, reason: String },

    /// A stored definition cannot be executed as written.
    #[error("invalid definition: {0}")]
    Definition(String),

    /// The caller-facing deadline elapsed.
    #[error("Tool execution timeout after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            GatewayError::InvalidParams(_)
            | GatewayError::ToolNotFound { .. }
            | GatewayError::ResourceNotFound { .. }
            | GatewayError::Core(CoreError::InvalidName { .. }) => error_codes::INVALID_PARAMS,
            GatewayError::Unauthorized(AuthError::Store(_) | AuthError::Internal(_)) => {
                error_codes::INTERNAL_ERROR
            }
            GatewayError::Unauthorized(_) => error_codes::UNAUTHORIZED,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn query(vendor: VendorKind, err: impl std::fmt::Display) -> Self {
        GatewayError::Query {
            vendor,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(GatewayError::InvalidParams("x".into()).code(), -32602);
        assert_eq!(
            GatewayError::Core(CoreError::InvalidName {
                name: "a".into(),
                reason: "b".into()
            })
            .code(),
            -32602
        );
        assert_eq!(
            GatewayError::Core(CoreError::UnsupportedVendor("oracle".into())).code(),
            -32603
        );
        assert_eq!(GatewayError::Unauthorized(AuthError::Expired).code(), -32001);
        assert_eq!(GatewayError::Timeout { after_ms: 10 }.code(), -32603);
    }
}
