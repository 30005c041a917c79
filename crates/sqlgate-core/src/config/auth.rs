//! Credential checking configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether bearer credentials are checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Single-user mode: every caller acts as the default user.
    #[default]
    None,
    /// Credentials are verified and scoped.
    Enforced,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "disabled" => Ok(AuthMode::None),
            "enforced" | "on" | "enabled" => Ok(AuthMode::Enforced),
            other => Err(format!("unknown auth mode '{other}'")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,

    /// Shared HMAC secret for MCP credentials.
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Bearer credential of the current process (stdio callers have no
    /// other way to present one).
    #[serde(default)]
    pub token: Option<String>,

    /// Identity used when `mode` is `none`.
    #[serde(default = "default_username")]
    pub default_username: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            token_secret: None,
            token: None,
            default_username: default_username(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("default_username", &self.default_username)
            .finish()
    }
}

fn default_username() -> String {
    "local".to_string()
}
