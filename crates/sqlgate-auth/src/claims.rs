//! Credential payloads and the identity derived from them.

use serde::{Deserialize, Serialize};

/// `typ` carried by every MCP credential.
pub const MCP_TOKEN_TYPE: &str = "sqlgate-mcp";

/// Role of the credential subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Signed payload of an MCP credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpClaims {
    /// Token id; matches `TokenRecord::id`.
    pub jti: String,
    /// Subject username.
    pub sub: String,
    /// Workspace id.
    pub ws: String,
    pub role: Role,
    pub typ: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. Absent for never-expiring credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl McpClaims {
    /// Claims for a fresh credential with a random token id.
    pub fn new(sub: impl Into<String>, ws: impl Into<String>, role: Role, iat: i64) -> Self {
        Self {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: sub.into(),
            ws: ws.into(),
            role,
            typ: MCP_TOKEN_TYPE.to_string(),
            iat,
            exp: None,
        }
    }

    pub fn with_expiry(mut self, exp: i64) -> Self {
        self.exp = Some(exp);
        self
    }

    pub fn identity(&self) -> Identity {
        Identity {
            token_id: self.jti.clone(),
            username: self.sub.clone(),
            workspace: self.ws.clone(),
            role: self.role,
        }
    }
}

/// Who is calling, as established by a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub token_id: String,
    pub username: String,
    pub workspace: String,
    pub role: Role,
}
