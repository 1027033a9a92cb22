//! Credential token generation and hashing
//!
//! Credentials are opaque bearer tokens: `oc_{random}`. Only the sha256
//! hash is stored; validation recomputes the hash and compares in constant
//! time so lookups cannot be used as a timing oracle.

use rand::Rng;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::core::constants::{TOKEN_PREFIX, TOKEN_RANDOM_LENGTH};

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate an opaque credential token: oc_{random}
///
/// Uses OsRng (CSPRNG).
pub fn generate_token() -> String {
    let random: String = (0..TOKEN_RANDOM_LENGTH)
        .map(|_| CHARSET[OsRng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}{}", TOKEN_PREFIX, random)
}

/// Validate token format: oc_{random alphanumeric}
pub fn is_valid_token(token: &str) -> bool {
    token.starts_with(TOKEN_PREFIX)
        && token.len() == TOKEN_PREFIX.len() + TOKEN_RANDOM_LENGTH
        && token[TOKEN_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// sha256 hash of a token, hex encoded
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Extract a bearer token from an Authorization header value
pub fn extract_bearer(header: &str) -> Option<String> {
    header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert!(token.starts_with(TOKEN_PREFIX));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + TOKEN_RANDOM_LENGTH);
        assert!(is_valid_token(&token));
    }

    #[test]
    fn test_generate_token_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_is_valid_token_rejects_bad_shapes() {
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("oc_"));
        assert!(!is_valid_token("pk-ss-abc"));
        assert!(!is_valid_token(&format!(
            "oc_{}",
            "A".repeat(TOKEN_RANDOM_LENGTH)
        )));
    }

    #[test]
    fn test_hash_token_stable() {
        let token = "oc_test";
        assert_eq!(hash_token(token), hash_token(token));
        assert_eq!(hash_token(token).len(), 64);
        assert_ne!(hash_token(token), hash_token("oc_other"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer oc_abc").as_deref(), Some("oc_abc"));
        assert_eq!(extract_bearer("Basic xyz"), None);
        assert_eq!(extract_bearer("oc_abc"), None);
    }
}
