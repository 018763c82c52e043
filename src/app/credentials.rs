//! API tokens and referral codes.

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// Prefix that makes leaked tokens easy to recognise
pub const API_TOKEN_PREFIX: &str = "inum_";

/// Length of generated referral codes
pub const REFERRAL_CODE_LEN: usize = 8;

/// Fresh bearer token: prefix plus 32 random bytes in hex
#[must_use]
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_TOKEN_PREFIX, hex::encode(bytes))
}

/// Only the SHA-256 of a token is stored
#[must_use]
pub fn hash_api_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Uppercase alphanumeric referral code
#[must_use]
pub fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Canonical form of a user-typed referral code
#[must_use]
pub fn normalize_referral_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_token_format() {
        let token = generate_api_token();
        assert!(token.starts_with(API_TOKEN_PREFIX));
        assert_eq!(token.len(), API_TOKEN_PREFIX.len() + 64);
        assert_ne!(token, generate_api_token());
    }

    #[test]
    fn test_hash_is_stable_and_hex() {
        let hash = hash_api_token("inum_abc");
        assert_eq!(hash, hash_api_token("inum_abc"));
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_api_token("inum_abd"));
    }

    #[test]
    fn test_referral_code_shape() {
        let code = generate_referral_code();
        assert_eq!(code.len(), REFERRAL_CODE_LEN);
        assert!(
            code.chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        );
        assert_eq!(normalize_referral_code("  k7q2m9xa "), "K7Q2M9XA");
    }
}
