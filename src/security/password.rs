//! Password hashing and verification (Argon2id, PHC strings by default).

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

/// Produces and checks stored credential hashes.
pub trait PasswordVerifier: Send + Sync {
    /// Hash a password into the format `verify` accepts.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    fn hash(&self, password: &str) -> Result<String>;

    /// Returns `Ok(false)` on mismatch; errors are reserved for unreadable hashes.
    ///
    /// # Errors
    /// Returns an error when the stored hash cannot be parsed.
    fn verify(&self, password: &str, password_hash: &str) -> Result<bool>;
}

#[derive(Clone, Default)]
pub struct Argon2Verifier {
    argon2: Argon2<'static>,
}

impl Argon2Verifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PasswordVerifier for Argon2Verifier {
    /// PHC string with a random salt.
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    }

    fn verify(&self, password: &str, password_hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|err| anyhow!("stored password hash is unreadable: {err}"))?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() -> Result<()> {
        let verifier = Argon2Verifier::new();
        let hash = verifier.hash("correct horse")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verifier.verify("correct horse", &hash)?);
        assert!(!verifier.verify("battery staple", &hash)?);
        Ok(())
    }

    #[test]
    fn salts_differ() -> Result<()> {
        let verifier = Argon2Verifier::new();
        assert_ne!(verifier.hash("same")?, verifier.hash("same")?);
        Ok(())
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(Argon2Verifier::new().verify("pw", "not-a-phc-string").is_err());
    }
}
