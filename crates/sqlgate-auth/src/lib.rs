//! # sqlgate-auth
//!
//! Credentials and authorization for the sqlgate gateway.
//!
//! - HMAC-SHA256 signed MCP credentials ([`TokenBuilder`], [`TokenVerifier`])
//! - Credential hashing for stored token lookup ([`hash_token`])
//! - The three-level [`AuthGate`]: global validity, server, tool/resource

pub mod claims;
pub mod error;
pub mod gate;
pub mod token;

pub use claims::{Identity, MCP_TOKEN_TYPE, McpClaims, Role};
pub use error::AuthError;
pub use gate::{AuthGate, Clock, ManualClock, Principal, SystemClock};
pub use token::{TokenBuilder, TokenVerifier, hash_token};
