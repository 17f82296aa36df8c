//! Session token issuance.
//!
//! A short-lived signed proof returned on every successful
//! validate/heartbeat/force-validate. Clients verify the signature with the
//! embedded public key, then check aud (product), dfp (device binding) and
//! exp before unlocking features.

use std::sync::Arc;

use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

use super::{SigningKeyProvider, TokenClaims};

pub struct SessionToken {
    pub token: String,
}

pub struct SessionTokenIssuer {
    provider: Arc<SigningKeyProvider>,
    issuer: String,
    ttl_minutes: i64,
}

impl SessionTokenIssuer {
    pub fn new(provider: Arc<SigningKeyProvider>, issuer: String, ttl_minutes: i64) -> Self {
        Self {
            provider,
            issuer,
            ttl_minutes,
        }
    }

    /// Sign a session token. Returns None when no signing key is configured;
    /// callers treat the absence as "online-only mode", not an error.
    pub fn issue(
        &self,
        license_id: &str,
        product_code: &str,
        device_fingerprint: &str,
        entitlements: &[String],
    ) -> Result<Option<SessionToken>> {
        let key_pair = match self.provider.key_pair() {
            Some(kp) => kp,
            None => {
                tracing::warn!("no signing key configured; session token not issued");
                return Ok(None);
            }
        };

        let custom = TokenClaims {
            token_type: None,
            device_fingerprint: device_fingerprint.to_string(),
            entitlements: entitlements.to_vec(),
        };

        let claims =
            Claims::with_custom_claims(custom, Duration::from_mins(self.ttl_minutes as u64))
                .with_issuer(&self.issuer)
                .with_audience(product_code)
                .with_subject(license_id);

        let token = key_pair
            .sign(claims)
            .map_err(|e| AppError::Internal(format!("failed to sign session token: {}", e)))?;

        Ok(Some(SessionToken { token }))
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl_minutes
    }
}
