//! Owner identity extraction.
//!
//! The login flow lives elsewhere; this server only consumes its result: a
//! first-party bearer token signed with the server key (iss pinned, sub =
//! user id). When token issuance is disabled (dev without a key), the
//! `x-debug-user` header stands in so the licensing flows stay exercisable.

use axum::{extract::FromRequestParts, http::request::Parts};
use jwt_simple::prelude::*;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::tokens::SigningKeyProvider;
use crate::util::extract_bearer_token;

const ACCOUNT_ISSUER: &str = "keygate-account";
const ACCOUNT_TOKEN_TTL_HOURS: u64 = 24;

/// The authenticated caller. Owner identity always comes from here, never
/// from the request body.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        if state.signing.is_enabled() {
            let token = extract_bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
            let user_id = verify_account_token(&state.signing, token)?;
            return Ok(AuthedUser { user_id });
        }

        if state.dev_mode {
            if let Some(user_id) = parts
                .headers
                .get("x-debug-user")
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty())
            {
                return Ok(AuthedUser {
                    user_id: user_id.to_string(),
                });
            }
        }

        Err(AppError::Unauthorized)
    }
}

fn verify_account_token(provider: &SigningKeyProvider, token: &str) -> Result<String> {
    let public_key = provider
        .public_key()
        .ok_or_else(|| AppError::Internal("signing key disappeared".into()))?;

    let options = VerificationOptions {
        allowed_issuers: Some([ACCOUNT_ISSUER.to_string()].into_iter().collect()),
        ..Default::default()
    };

    let claims = public_key
        .verify_token::<NoCustomClaims>(token, Some(options))
        .map_err(|_| AppError::Unauthorized)?;

    claims.subject.ok_or(AppError::Unauthorized)
}

/// Mint a first-party account token for a user. Used by the dev seed and the
/// test suites; real deployments mint these in the account service.
pub fn issue_account_token(provider: &SigningKeyProvider, user_id: &str) -> Result<Option<String>> {
    let key_pair = match provider.key_pair() {
        Some(kp) => kp,
        None => return Ok(None),
    };

    let claims = Claims::create(Duration::from_hours(ACCOUNT_TOKEN_TTL_HOURS))
        .with_issuer(ACCOUNT_ISSUER)
        .with_subject(user_id);

    let token = key_pair
        .sign(claims)
        .map_err(|e| AppError::Internal(format!("failed to sign account token: {}", e)))?;
    Ok(Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_token_round_trip() {
        let provider = SigningKeyProvider::generate("test-v1");
        let token = issue_account_token(&provider, "user-42").unwrap().unwrap();
        assert_eq!(verify_account_token(&provider, &token).unwrap(), "user-42");
    }

    #[test]
    fn foreign_issuer_is_rejected() {
        let provider = SigningKeyProvider::generate("test-v1");
        let key_pair = provider.key_pair().unwrap();
        let claims = Claims::create(Duration::from_hours(1))
            .with_issuer("someone-else")
            .with_subject("user-42");
        let token = key_pair.sign(claims).unwrap();

        assert!(verify_account_token(&provider, &token).is_err());
    }

    #[test]
    fn disabled_provider_mints_nothing() {
        let provider = SigningKeyProvider::disabled();
        assert!(issue_account_token(&provider, "user-42").unwrap().is_none());
    }
}
