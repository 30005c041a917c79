//! Minting and verifying HMAC-signed MCP credentials.
//!
//! Format: `base64url(json claims) "." base64url(HMAC-SHA256(secret, claims_b64))`,
//! both parts without padding. Stored token records are keyed by the hex
//! SHA-256 of the whole credential string, so the store never holds a usable
//! secret.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::claims::{MCP_TOKEN_TYPE, McpClaims};
use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of a credential, the lookup key for its stored record.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Signs MCP credentials with the shared secret.
#[derive(Clone)]
pub struct TokenBuilder {
    secret: Vec<u8>,
}

impl TokenBuilder {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Serialize and sign `claims`.
    pub fn mint(&self, claims: &McpClaims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Internal(e.into()))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
        let signature = sign(&self.secret, &payload_b64)?;
        Ok(format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }
}

/// Verifies MCP credentials against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Check the signature, type and expiry of a credential at time `now`
    /// (unix seconds) and return its claims.
    pub fn verify(&self, token: &str, now: i64) -> Result<McpClaims, AuthError> {
        let (payload_b64, signature_b64) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| AuthError::Malformed("expected 'payload.signature'".to_string()))?;
        if signature_b64.contains('.') {
            return Err(AuthError::Malformed("too many segments".to_string()));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| AuthError::Malformed(format!("signature: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("hmac key: {e}")))?;
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| AuthError::Malformed(format!("payload: {e}")))?;
        let claims: McpClaims = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::Malformed(format!("claims: {e}")))?;

        if claims.typ != MCP_TOKEN_TYPE {
            return Err(AuthError::WrongType(claims.typ));
        }
        if let Some(exp) = claims.exp
            && exp <= now
        {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }
}

fn sign(secret: &[u8], payload_b64: &str) -> Result<Vec<u8>, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("hmac key: {e}")))?;
    mac.update(payload_b64.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}
