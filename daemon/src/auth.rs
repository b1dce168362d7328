//! Authentication boundary.
//!
//! OAuth/LDAP providers are independent libraries reused by the control
//! plane, not implemented by it; the core only ever consumes an opaque
//! principal when enforcing permissions. This module is that boundary — it
//! decodes a bearer JWT (`jsonwebtoken`-based) into a `Principal` the RPC
//! layer attaches to a request, nothing more.

use crate::config::AuthConfig;
use crate::errors::{DaemonError, DaemonResult};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// An opaque identity the RPC dispatch can pass down to role/permission
/// checks without knowing how it was authenticated.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<String>,
}

pub struct AuthManager {
    config: AuthConfig,
    decoding_key: DecodingKey,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self { config, decoding_key }
    }

    /// `None` when auth is disabled: every request is anonymous and
    /// permission checks fall back to whatever the caller asserts.
    pub fn authenticate(&self, token: Option<&str>) -> DaemonResult<Option<Principal>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let token = token.ok_or_else(|| DaemonError::AuthError("missing bearer token".into()))?;
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| DaemonError::AuthError(format!("token rejected: {e}")))?;
        Ok(Some(Principal { subject: data.claims.sub, roles: data.claims.roles }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_accepts_no_token() {
        let manager = AuthManager::new(AuthConfig { enabled: false, jwt_secret: "x".into() });
        assert!(manager.authenticate(None).unwrap().is_none());
    }

    #[test]
    fn enabled_auth_rejects_missing_token() {
        let manager = AuthManager::new(AuthConfig { enabled: true, jwt_secret: "secret".into() });
        assert!(manager.authenticate(None).is_err());
    }

    #[test]
    fn enabled_auth_rejects_garbage_token() {
        let manager = AuthManager::new(AuthConfig { enabled: true, jwt_secret: "secret".into() });
        assert!(manager.authenticate(Some("not-a-jwt")).is_err());
    }
}
