//! Capability token material

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Mint a fresh bearer token: 256 random bits, URL-safe base64.
///
/// The plaintext is returned exactly once; only the SHA-256 hex digest is
/// ever stored.
pub fn mint_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&token);
    (token, hash)
}

/// SHA-256 hex digest of a token's UTF-8 bytes.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let (token, hash) = mint_token();
        // 32 bytes of entropy → 43 base64 chars without padding.
        assert_eq!(token.len(), 43);
        assert_eq!(hash.len(), 64);
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
        assert_eq!(hash, hash_token(&token));
    }

    #[test]
    fn test_tokens_are_unique() {
        let (a, _) = mint_token();
        let (b, _) = mint_token();
        assert_ne!(a, b);
    }
}
