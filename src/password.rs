//! Password and client-secret hashing.
//!
//! Hashes are argon2id PHC strings. Verification on a lookup miss still burns one
//! argon2 comparison against a fixed dummy hash so a miss and a mismatch cost the same.

use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("failed to generate random bytes: {0}")]
    Random(#[from] rand::Error),
}

static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

/// Hash `password` with a fresh salt.
///
/// # Errors
/// Returns an error if argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Hash(e.to_string()))
}

/// Check `password` against a stored PHC string. A malformed hash never verifies.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Spend the same effort as a real verification when there is no stored hash.
pub fn verify_dummy(password: &str) {
    let dummy = DUMMY_HASH.get_or_init(|| hash_password("custos-dummy-password").ok());
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}

/// 32 random bytes, base64url without padding. Used for signing secrets, client
/// secrets and authorization codes.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_secret() -> Result<String, Error> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
