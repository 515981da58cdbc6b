//! Credential handling: passphrase hashing and verification codes.

pub mod password;

use rand::Rng;

/// Characters used in REG verification codes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Generate a 15-character account verification code.
pub fn generate_auth_code() -> String {
    let mut rng = rand::thread_rng();
    (0..15)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Constant-time comparison for verification codes.
pub fn codes_match(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_code_shape() {
        let code = generate_auth_code();
        assert_eq!(code.len(), 15);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn code_comparison() {
        assert!(codes_match("abc123", "abc123"));
        assert!(!codes_match("abc123", "abc124"));
        assert!(!codes_match("abc123", "abc12"));
    }
}
