//! Offline token issuance.
//!
//! Lets a disconnected client keep trusting its license for a bounded window.
//! Two rules govern issuance:
//!
//! - absolute cap: exp = min(now + allowOfflineDays, license.validUntil), so
//!   an offline token can never outlive its license.
//! - renewal threshold: re-sign only when the cached token's remaining life is
//!   below a fraction of the nominal offline period or below a fixed number of
//!   days, amortizing signing cost across heartbeats.

use std::sync::Arc;

use chrono::Utc;
use jwt_simple::prelude::*;

use crate::error::{AppError, Result};

use super::{SigningKeyProvider, TokenClaims};

const SECONDS_PER_DAY: i64 = 86400;

pub struct OfflineToken {
    pub token: String,
    pub expires_at: i64,
}

pub struct OfflineTokenIssuer {
    provider: Arc<SigningKeyProvider>,
    issuer: String,
    renewal_threshold_ratio: f64,
    renewal_threshold_days: i64,
}

impl OfflineTokenIssuer {
    pub fn new(
        provider: Arc<SigningKeyProvider>,
        issuer: String,
        renewal_threshold_ratio: f64,
        renewal_threshold_days: i64,
    ) -> Self {
        Self {
            provider,
            issuer,
            renewal_threshold_ratio,
            renewal_threshold_days,
        }
    }

    /// Sign an offline token. Returns None when no key is configured, or when
    /// the capped lifetime has already elapsed (a grace-period license past
    /// its validUntil has nothing left to attest offline).
    pub fn issue(
        &self,
        license_id: &str,
        product_code: &str,
        device_fingerprint: &str,
        entitlements: &[String],
        allow_offline_days: i64,
        license_valid_until: Option<i64>,
    ) -> Result<Option<OfflineToken>> {
        let key_pair = match self.provider.key_pair() {
            Some(kp) => kp,
            None => {
                tracing::warn!("no signing key configured; offline token not issued");
                return Ok(None);
            }
        };

        let now = Utc::now().timestamp();
        let base_exp = now + allow_offline_days * SECONDS_PER_DAY;
        let exp = match license_valid_until {
            Some(until) if base_exp > until => {
                tracing::debug!(exp = until, "offline token exp capped to license validUntil");
                until
            }
            _ => base_exp,
        };

        let remaining = exp - now;
        if remaining <= 0 {
            return Ok(None);
        }

        let custom = TokenClaims {
            token_type: Some("offline".to_string()),
            device_fingerprint: device_fingerprint.to_string(),
            entitlements: entitlements.to_vec(),
        };

        let claims = Claims::with_custom_claims(custom, Duration::from_secs(remaining as u64))
            .with_issuer(&self.issuer)
            .with_audience(product_code)
            .with_subject(license_id);

        let token = key_pair
            .sign(claims)
            .map_err(|e| AppError::Internal(format!("failed to sign offline token: {}", e)))?;

        Ok(Some(OfflineToken {
            token,
            expires_at: exp,
        }))
    }

    /// Whether the cached token needs re-signing: absent, expired, below the
    /// ratio threshold, or below the fixed minimum.
    pub fn should_renew(
        &self,
        current_expires_at: Option<i64>,
        allow_offline_days: i64,
        now: i64,
    ) -> bool {
        let expires_at = match current_expires_at {
            None => return true,
            Some(ts) => ts,
        };

        if now >= expires_at {
            return true;
        }

        let remaining = expires_at - now;
        let total = allow_offline_days * SECONDS_PER_DAY;

        if (remaining as f64) < (total as f64) * self.renewal_threshold_ratio {
            return true;
        }

        remaining < self.renewal_threshold_days * SECONDS_PER_DAY
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }
}
