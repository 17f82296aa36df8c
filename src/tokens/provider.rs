//! Signing key provider for token issuance.
//!
//! Loads an Ed25519 seed (base64, 32 bytes) from a file. Key handling policy:
//! prod refuses to start without a key (fail-fast); dev degrades to
//! "token issuance disabled" so license validation still works online-only.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use jwt_simple::prelude::*;

use crate::config::Config;
use crate::error::{AppError, Result};

pub struct SigningKeyProvider {
    key_pair: Option<Ed25519KeyPair>,
    key_id: String,
}

impl SigningKeyProvider {
    /// Build the provider from config. In prod a missing or unreadable key is
    /// a startup error; in dev it disables issuance with a warning.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = match &config.signing_key_path {
            Some(path) => path,
            None => {
                if config.dev_mode {
                    tracing::warn!(
                        "SIGNING_KEY_PATH not set; session/offline token issuance disabled. \
                         Generate a key with: openssl rand -base64 32 > signing.key"
                    );
                    return Ok(Self::disabled());
                }
                return Err(AppError::Internal(
                    "SIGNING_KEY_PATH is required in prod; refusing to start".into(),
                ));
            }
        };

        match Self::load_from_file(path, &config.signing_key_id) {
            Ok(provider) => {
                tracing::info!(key_id = %provider.key_id, path = %path, "signing key loaded");
                Ok(provider)
            }
            Err(e) if config.dev_mode => {
                tracing::error!("failed to load signing key from {}: {}; token issuance disabled", path, e);
                Ok(Self::disabled())
            }
            Err(e) => Err(AppError::Internal(format!(
                "failed to load signing key from {}: {}",
                path, e
            ))),
        }
    }

    fn load_from_file(path: &str, key_id: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("cannot read key file: {}", e)))?;
        let decoded = BASE64
            .decode(raw.trim())
            .map_err(|e| AppError::Internal(format!("invalid key encoding: {}", e)))?;

        let seed: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Internal("signing key must be a 32-byte Ed25519 seed".into()))?;

        let signing_key = SigningKey::from_bytes(&seed);
        let key_pair = Ed25519KeyPair::from_bytes(&signing_key.to_keypair_bytes())
            .map_err(|e| AppError::Internal(format!("invalid Ed25519 key: {}", e)))?
            .with_key_id(key_id);

        Ok(Self {
            key_pair: Some(key_pair),
            key_id: key_id.to_string(),
        })
    }

    /// Provider with no key: issuance disabled, validation still succeeds in
    /// online-proof-only mode.
    pub fn disabled() -> Self {
        Self {
            key_pair: None,
            key_id: String::new(),
        }
    }

    /// Fresh random key pair. Test and dev tooling only; prod loads from disk.
    pub fn generate(key_id: &str) -> Self {
        let key_pair = Ed25519KeyPair::generate().with_key_id(key_id);
        Self {
            key_pair: Some(key_pair),
            key_id: key_id.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.key_pair.is_some()
    }

    pub fn key_pair(&self) -> Option<&Ed25519KeyPair> {
        self.key_pair.as_ref()
    }

    pub fn public_key(&self) -> Option<Ed25519PublicKey> {
        self.key_pair.as_ref().map(|kp| kp.public_key())
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}
