//! Passphrase hashing.
//!
//! Two schemes are supported: argon2 (the default for stored account
//! credentials) and bcrypt (accepted for oper blocks migrated from other
//! daemons). Verification runs on the blocking pool so a slow hash never
//! stalls the event loop.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::HandlerError;

/// Hash scheme names accepted in oper blocks and printed by `--list-hashes`.
pub const SCHEMES: &[&str] = &["argon2", "bcrypt"];

/// Hash a passphrase with the named scheme (blocking).
pub fn hash_blocking(scheme: &str, password: &str) -> Result<String, HandlerError> {
    match scheme {
        "argon2" => {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| HandlerError::Hashing(e.to_string()))
        }
        "bcrypt" => bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| HandlerError::Hashing(e.to_string())),
        other => Err(HandlerError::Hashing(format!("unknown scheme {other}"))),
    }
}

fn verify_blocking(password: &str, stored: &str) -> bool {
    if stored.starts_with("$argon2") {
        PasswordHash::new(stored)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    } else if stored.starts_with("$2") {
        bcrypt::verify(password, stored).unwrap_or(false)
    } else {
        false
    }
}

/// Hash a passphrase with the default scheme (non-blocking).
pub async fn hash(password: String) -> Result<String, HandlerError> {
    tokio::task::spawn_blocking(move || hash_blocking("argon2", &password))
        .await
        .map_err(|e| HandlerError::Hashing(e.to_string()))?
}

/// Verify a passphrase against a stored hash of either scheme (non-blocking).
///
/// The scheme is recognized from the hash prefix; an unrecognized prefix
/// verifies as false rather than erroring, so all failure modes look alike
/// to the client.
pub async fn verify(password: String, stored: String) -> bool {
    tokio::task::spawn_blocking(move || verify_blocking(&password, &stored))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_roundtrip() {
        let hash = hash_blocking("argon2", "correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_blocking("correct horse", &hash));
        assert!(!verify_blocking("wrong", &hash));
    }

    #[test]
    fn bcrypt_roundtrip() {
        let hash = hash_blocking("bcrypt", "hunter2").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_blocking("hunter2", &hash));
        assert!(!verify_blocking("hunter3", &hash));
    }

    #[test]
    fn unknown_scheme_rejected() {
        assert!(hash_blocking("rot13", "pw").is_err());
    }

    #[test]
    fn unrecognized_hash_never_verifies() {
        assert!(!verify_blocking("pw", "plaintext-not-a-hash"));
        assert!(!verify_blocking("", ""));
    }
}
