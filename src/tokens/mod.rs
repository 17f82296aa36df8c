mod offline;
mod provider;
mod session;

pub use offline::{OfflineToken, OfflineTokenIssuer};
pub use provider::SigningKeyProvider;
pub use session::{SessionToken, SessionTokenIssuer};

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Custom claims shared by session and offline tokens. Standard claims
/// (iss, aud, sub, iat, exp) are handled by jwt-simple; the header carries
/// the key id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// "offline" for offline tokens, absent for session tokens.
    #[serde(rename = "typ", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Device binding: clients must reject tokens whose dfp does not match
    /// their own fingerprint.
    #[serde(rename = "dfp")]
    pub device_fingerprint: String,
    /// Entitlement list driving feature unlock.
    #[serde(rename = "ent")]
    pub entitlements: Vec<String>,
}

/// Verify a token against the server public key, pinning the audience to the
/// product code. EdDSA only: there is no algorithm negotiation to confuse.
pub fn verify_token(
    public_key: &Ed25519PublicKey,
    token: &str,
    expected_audience: &str,
) -> Result<JWTClaims<TokenClaims>> {
    let options = VerificationOptions {
        allowed_audiences: Some([expected_audience.to_string()].into_iter().collect()),
        ..Default::default()
    };
    public_key
        .verify_token::<TokenClaims>(token, Some(options))
        .map_err(|e| AppError::BadRequest(format!("Invalid token: {}", e)))
}
