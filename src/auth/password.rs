use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("argon2: {0}")]
    Hash(password_hash::Error),
    #[error("stored credential is not a valid PHC string: {0}")]
    MalformedHash(password_hash::Error),
}

/// Length rule applied to new passwords; returns the message to show for the field.
pub fn check_length(plain: &str) -> Result<(), String> {
    let len = plain.chars().count();
    if len < MIN_PASSWORD_LEN {
        Err(format!(
            "Ensure this field has at least {MIN_PASSWORD_LEN} characters."
        ))
    } else if len > MAX_PASSWORD_LEN {
        Err(format!(
            "Ensure this field has no more than {MAX_PASSWORD_LEN} characters."
        ))
    } else {
        Ok(())
    }
}

/// One-way argon2 hash in PHC string format. The plaintext is never kept.
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError::Hash(e)
        })
}

pub fn verify_password(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        PasswordError::MalformedHash(e)
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hides_plaintext_and_verifies() {
        let hash = hash_password("pw123456").expect("hashing should succeed");
        assert!(!hash.contains("pw123456"));
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("pw123456", &hash).expect("verify should succeed"));
        assert!(!verify_password("pw1234567", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_password_gets_fresh_salt() {
        let a = hash_password("pw123456").unwrap();
        let b = hash_password("pw123456").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(matches!(err, PasswordError::MalformedHash(_)));
    }

    #[test]
    fn length_bounds() {
        assert!(check_length("short").is_err());
        assert!(check_length("exactly8").is_ok());
        assert!(check_length(&"x".repeat(128)).is_ok());
        assert!(check_length(&"x".repeat(129)).is_err());
    }
}
