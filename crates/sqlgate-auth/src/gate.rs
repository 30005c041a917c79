//! The authorization gate.
//!
//! Three escalating checks, each short-circuiting:
//!
//! 1. **Global validity** ([`AuthGate::authenticate`]): in `none` mode every
//!    caller acts as the default user. In `enforced` mode a presented
//!    credential must verify, resolve to a stored record by hash, and that
//!    record must be live and match the credential's identity.
//! 2. **Server** ([`AuthGate::authorize_server`]): owner prefix and server
//!    scope for token holders; per-server `require_mcp_token` for callers
//!    without a credential.
//! 3. **Tool / resource** ([`AuthGate::authorize_tool`],
//!    [`AuthGate::authorize_resource`]): the full name must be in scope.
//!
//! Validity is never cached: callers authenticate once per message so that
//! revocation and expiry take effect on the next call.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlgate_core::{AuthConfig, AuthMode, FullName, TokenRecord, names};
use sqlgate_store::MetadataStore;

use crate::claims::Identity;
use crate::error::AuthError;
use crate::token::{TokenVerifier, hash_token};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The caller of one message, as established by [`AuthGate::authenticate`].
#[derive(Debug, Clone)]
pub enum Principal {
    /// Auth mode `none`: everything is allowed.
    Anonymous { username: String },
    /// Auth mode `enforced` and no credential presented.
    Public,
    /// A verified credential and its stored record.
    Token {
        identity: Identity,
        record: TokenRecord,
    },
}

impl Principal {
    /// Username for logging.
    pub fn username(&self) -> &str {
        match self {
            Principal::Anonymous { username } => username,
            Principal::Public => "-",
            Principal::Token { identity, .. } => &identity.username,
        }
    }
}

/// Decides which servers, tools and resources a caller may touch.
pub struct AuthGate {
    mode: AuthMode,
    verifier: Option<TokenVerifier>,
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    default_username: String,
}

impl AuthGate {
    pub fn new(
        mode: AuthMode,
        verifier: Option<TokenVerifier>,
        store: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mode,
            verifier,
            store,
            clock,
            default_username: "local".to_string(),
        }
    }

    /// Build a gate from configuration with the system clock.
    pub fn from_config(config: &AuthConfig, store: Arc<dyn MetadataStore>) -> Result<Self, AuthError> {
        let verifier = config.token_secret.as_deref().map(TokenVerifier::new);
        if config.mode == AuthMode::Enforced && verifier.is_none() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self::new(config.mode, verifier, store, Arc::new(SystemClock))
            .with_default_username(config.default_username.clone()))
    }

    /// Identity used in `none` mode.
    pub fn with_default_username(mut self, username: impl Into<String>) -> Self {
        self.default_username = username.into();
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Global validity check.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        if self.mode == AuthMode::None {
            return Ok(Principal::Anonymous {
                username: self.default_username.clone(),
            });
        }

        let Some(token) = credential.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(Principal::Public);
        };
        let verifier = self.verifier.as_ref().ok_or(AuthError::MissingSecret)?;

        let now = self.clock.now();
        let claims = verifier.verify(token, now.timestamp()).inspect_err(|e| {
            tracing::debug!(error = %e, "credential rejected");
        })?;

        let record = self
            .store
            .get_mcp_token_by_hash(&hash_token(token))
            .await?
            .ok_or(AuthError::UnknownToken)?;

        if record.is_revoked() {
            return Err(AuthError::Revoked);
        }
        if record.id != claims.jti
            || record.subject_username != claims.sub
            || record.workspace_id != claims.ws
        {
            tracing::warn!(token_id = %record.id, "credential claims do not match stored record");
            return Err(AuthError::IdentityMismatch);
        }
        if record.is_expired(now) {
            return Err(AuthError::Expired);
        }

        Ok(Principal::Token {
            identity: claims.identity(),
            record,
        })
    }

    /// May `principal` touch this server at all?
    pub async fn authorize_server(&self, principal: &Principal, server_id: &str) -> Result<(), AuthError> {
        match principal {
            Principal::Anonymous { .. } => Ok(()),
            Principal::Public => {
                let require = self
                    .store
                    .get_server_auth_config(server_id)
                    .await?
                    .unwrap_or_default()
                    .require_mcp_token;
                if require {
                    Err(AuthError::CredentialRequired {
                        server_id: server_id.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            Principal::Token { identity, record } => {
                let owner = names::owner_prefix(server_id);
                if owner != identity.workspace && owner != identity.username {
                    return Err(AuthError::ServerForbidden {
                        server_id: server_id.to_string(),
                        reason: "not owned by this workspace".to_string(),
                    });
                }
                if !record.servers.allows(server_id) {
                    return Err(AuthError::ServerForbidden {
                        server_id: server_id.to_string(),
                        reason: "not in token scope".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// May `principal` call this tool?
    pub async fn authorize_tool(&self, principal: &Principal, name: &FullName) -> Result<(), AuthError> {
        self.authorize_server(principal, name.server_id()).await?;
        if self.tool_in_scope(principal, &name.to_string()) {
            Ok(())
        } else {
            Err(AuthError::ToolForbidden {
                name: name.to_string(),
            })
        }
    }

    /// May `principal` read this resource?
    pub async fn authorize_resource(&self, principal: &Principal, name: &FullName) -> Result<(), AuthError> {
        self.authorize_server(principal, name.server_id()).await?;
        if self.resource_in_scope(principal, &name.to_string()) {
            Ok(())
        } else {
            Err(AuthError::ResourceForbidden {
                name: name.to_string(),
            })
        }
    }

    /// Non-failing server check for listings.
    pub async fn can_access_server(&self, principal: &Principal, server_id: &str) -> bool {
        self.authorize_server(principal, server_id).await.is_ok()
    }

    /// Tool-level scope only; pair with [`Self::can_access_server`].
    pub fn tool_in_scope(&self, principal: &Principal, full_name: &str) -> bool {
        match principal {
            Principal::Token { record, .. } => record.tools.allows(full_name),
            _ => true,
        }
    }

    /// Resource-level scope only; pair with [`Self::can_access_server`].
    pub fn resource_in_scope(&self, principal: &Principal, full_name: &str) -> bool {
        match principal {
            Principal::Token { record, .. } => record.resources.allows(full_name),
            _ => true,
        }
    }
}
