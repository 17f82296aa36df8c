//! Redeem code normalization, validation and hashing.
//!
//! Codes are user-typed, so input is folded aggressively before lookup:
//! trim, Unicode NFKC, uppercase, strip whitespace/hyphen/underscore. Only
//! the peppered SHA-256 hash of the normalized form is ever stored or logged.

use rand::Rng;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, ErrorCode, Result};

const ALLOWED_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const RANDOM_CODE_LENGTH: usize = 16;
const MIN_CODE_LENGTH: usize = 8;
const MAX_CODE_LENGTH: usize = 64;

pub struct CodeHasher {
    pepper: String,
}

impl CodeHasher {
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    /// Fold raw user input into canonical form.
    pub fn normalize(&self, raw: &str) -> Result<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::license(ErrorCode::RedeemCodeInvalid));
        }
        let folded: String = trimmed.nfkc().collect::<String>().to_uppercase();
        Ok(folded
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect())
    }

    /// Shape check on the normalized form: 8-64 chars, A-Z and 0-9 only.
    pub fn validate(&self, normalized: &str) -> Result<()> {
        if normalized.len() < MIN_CODE_LENGTH || normalized.len() > MAX_CODE_LENGTH {
            return Err(AppError::license_with(
                ErrorCode::RedeemCodeInvalid,
                "code must be between 8 and 64 characters",
            ));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(AppError::license_with(
                ErrorCode::RedeemCodeInvalid,
                "code may only contain A-Z and 0-9",
            ));
        }
        Ok(())
    }

    /// `SHA-256(pepper:normalized)`, lowercase hex. The pepper keeps leaked
    /// hashes useless for offline guessing of short codes.
    pub fn hash(&self, normalized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pepper.as_bytes());
        hasher.update(b":");
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Random 16-char code over the allowed alphabet.
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..RANDOM_CODE_LENGTH)
            .map(|_| ALLOWED_CHARS[rng.gen_range(0..ALLOWED_CHARS.len())] as char)
            .collect()
    }

    /// Group a generated code for human display: `XXXX-XXXX-XXXX-XXXX`.
    pub fn format_for_display(&self, code: &str) -> String {
        if code.len() != RANDOM_CODE_LENGTH {
            return code.to_string();
        }
        format!(
            "{}-{}-{}-{}",
            &code[0..4],
            &code[4..8],
            &code[8..12],
            &code[12..16]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> CodeHasher {
        CodeHasher::new("test-pepper")
    }

    #[test]
    fn normalizes_grouped_input() {
        let h = hasher();
        assert_eq!(
            h.normalize("ABCD-EFGH-1234-5678").unwrap(),
            "ABCDEFGH12345678"
        );
        assert_eq!(h.normalize("  ab cd_ef-gh  ").unwrap(), "ABCDEFGH");
    }

    #[test]
    fn normalization_folds_fullwidth_digits() {
        // NFKC folds full-width forms to ASCII before the shape check
        let h = hasher();
        assert_eq!(h.normalize("ＡＢＣＤ１２３４").unwrap(), "ABCD1234");
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(hasher().normalize("   ").is_err());
    }

    #[test]
    fn validates_shape() {
        let h = hasher();
        assert!(h.validate("ABCDEFGH12345678").is_ok());
        assert!(h.validate("SHORT").is_err());
        assert!(h.validate(&"A".repeat(65)).is_err());
        assert!(h.validate("abcdefgh").is_err());
        assert!(h.validate("ABCD!FGH").is_err());
    }

    #[test]
    fn hash_is_stable_and_peppered() {
        let h = hasher();
        assert_eq!(h.hash("ABCDEFGH"), h.hash("ABCDEFGH"));
        assert_ne!(h.hash("ABCDEFGH"), CodeHasher::new("other").hash("ABCDEFGH"));
        // raw code never appears in the hash
        assert!(!h.hash("ABCDEFGH").contains("ABCDEFGH"));
    }

    #[test]
    fn generated_codes_survive_display_round_trip() {
        let h = hasher();
        let code = h.generate_code();
        assert_eq!(code.len(), 16);
        assert!(h.validate(&code).is_ok());

        let shown = h.format_for_display(&code);
        assert_eq!(h.normalize(&shown).unwrap(), code);
    }
}
