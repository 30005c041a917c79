//! Error types for credential handling and authorization.

use sqlgate_store::StoreError;
use thiserror::Error;

/// Errors raised while verifying credentials or checking scopes.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credential is not `payload.signature`.
    #[error("malformed credential: {0}")]
    Malformed(String),

    /// Signature does not match the shared secret.
    #[error("invalid credential signature")]
    InvalidSignature,

    /// Payload is signed but not an MCP credential.
    #[error("unexpected credential type: {0}")]
    WrongType(String),

    /// Credential or its stored record has expired.
    #[error("credential has expired")]
    Expired,

    /// No stored record for this credential.
    #[error("unknown credential")]
    UnknownToken,

    /// Stored record has been revoked.
    #[error("credential has been revoked")]
    Revoked,

    /// Stored record belongs to a different token id, subject or workspace.
    #[error("credential does not match its stored record")]
    IdentityMismatch,

    /// Enforced mode needs a signing secret to verify anything.
    #[error("no token secret configured")]
    MissingSecret,

    /// The backend requires a credential and none was presented.
    #[error("server {server_id} requires an MCP token")]
    CredentialRequired { server_id: String },

    /// The identity may not touch this backend.
    #[error("access to server {server_id} denied: {reason}")]
    ServerForbidden { server_id: String, reason: String },

    /// The token scope does not include this tool.
    #[error("tool {name} is not permitted by this token")]
    ToolForbidden { name: String },

    /// The token scope does not include this resource.
    #[error("resource {name} is not permitted by this token")]
    ResourceForbidden { name: String },

    /// Metadata lookup failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
