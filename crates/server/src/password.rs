//! Password hashing.

use crate::error::{ApiError, ApiResult};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::OsRng;
use trove_core::config::AuthConfig;

/// Stored for accounts that cannot log in with a password until one is set.
pub const UNUSABLE_PASSWORD: &str = "!";

/// Shortest password accepted on create or reset.
pub const MIN_PASSWORD_LEN: usize = 8;

fn hasher(config: &AuthConfig) -> ApiResult<Argon2<'static>> {
    let params = Params::new(
        config.password_memory_kib,
        config.password_hash_cost,
        1,
        None,
    )
    .map_err(|e| ApiError::Internal(format!("invalid password hashing parameters: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into PHC string form.
pub fn hash_password(config: &AuthConfig, password: &str) -> ApiResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher(config)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash. Unusable or corrupt hashes never match.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    // Parameters come from the stored hash, not from the current config.
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> AuthConfig {
        AuthConfig {
            password_hash_cost: 1,
            password_memory_kib: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password(&cheap(), "correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "correct horse"));
        assert!(!verify_password(&hash, "wrong horse"));
    }

    #[test]
    fn test_unusable_password_never_verifies() {
        assert!(!verify_password(UNUSABLE_PASSWORD, ""));
        assert!(!verify_password(UNUSABLE_PASSWORD, "!"));
    }

    #[test]
    fn test_short_password_rejected() {
        assert!(matches!(
            hash_password(&cheap(), "short"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
