//! Reconnect token minting and constant-time comparison (§4.9).

use rand::RngCore;

/// Number of random bytes backing a token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Mint a fresh 64-hex-character reconnect token from the OS CSPRNG.
pub fn generate_reconnect_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare two tokens in constant time with respect to their contents
/// (length is not secret). Used for reconnect validation so a timing
/// side-channel can't narrow down a valid token byte-by-byte.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_64_hex_chars() {
        let token = generate_reconnect_token();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn successive_tokens_differ() {
        assert_ne!(generate_reconnect_token(), generate_reconnect_token());
    }

    #[test]
    fn equality_is_exact() {
        let t = generate_reconnect_token();
        assert!(tokens_equal(&t, &t));
        assert!(!tokens_equal(&t, &generate_reconnect_token()));
    }

    #[test]
    fn different_lengths_never_match() {
        assert!(!tokens_equal("abcd", "abcdef"));
    }
}
