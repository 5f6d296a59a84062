//! Password and client-secret hashing, plus opaque token generation.
//!
//! Uses Argon2id for secure password hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine;

/// Minimum password length enforced on account creation.
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Hash a password or client secret using Argon2id.
///
/// Returns the PHC-formatted hash string suitable for storage.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// The digest comparison inside `argon2` is constant-time.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Check a new password against the account policy: at least
/// [`MIN_PASSWORD_LENGTH`] characters with a digit, an uppercase letter and a
/// non-alphanumeric character.
pub fn check_password_policy(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "must be at least {MIN_PASSWORD_LENGTH} characters long"
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("must contain a digit".into());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("must contain an uppercase letter".into());
    }
    if password.chars().all(|c| c.is_alphanumeric()) {
        return Err("must contain a non-alphanumeric character".into());
    }
    Ok(())
}

/// Generate a 256-bit URL-safe random token (authorization codes, refresh
/// tokens, family ids, CSRF tokens).
pub fn generate_token() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
