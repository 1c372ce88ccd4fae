//! Password hashing. Every path that stores or checks a password goes
//! through [`PasswordHasher`], so hashes written by the CLI, the admin API
//! and CSV ingestion are interchangeable.

use crate::error::AuthError;

/// Shortest password accepted anywhere.
pub const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Reject passwords shorter than [`MIN_PASSWORD_LEN`] characters.
    pub fn validate(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }
        Ok(())
    }

    /// Validate and hash. The result is a `$2b$` bcrypt string.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        Self::validate(password)?;
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// Hash on the blocking pool; bcrypt is deliberately slow.
    pub async fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let hasher = *self;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    /// Check `password` against a stored hash. Malformed hashes never match.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub async fn verify_blocking(&self, password: &str, hash: &str) -> bool {
        let hasher = *self;
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(4)
    }

    #[test]
    fn verify_accepts_own_hash() {
        let h = hasher();
        let hash = h.hash("EKB123").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(h.verify("EKB123", &hash));
        assert!(!h.verify("ekb123", &hash));
    }

    #[test]
    fn verify_accepts_2a_hashes() {
        // Hashes written by other bcrypt implementations use the $2a$ prefix.
        let h = hasher();
        let hash = h.hash("admin123").unwrap().replacen("$2b$", "$2a$", 1);
        assert!(h.verify("admin123", &hash));
    }

    #[test]
    fn short_passwords_rejected() {
        let err = hasher().hash("abc").unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword { min: 4 }));
        assert!(PasswordHasher::validate("abcd").is_ok());
        // counted in characters, not bytes
        assert!(PasswordHasher::validate("çãé").is_err());
    }

    #[test]
    fn malformed_hash_never_matches() {
        assert!(!hasher().verify("anything", "not-a-hash"));
        assert!(!hasher().verify("anything", ""));
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let h = hasher();
        let hash = h.hash_blocking("senha-forte").await.unwrap();
        assert!(h.verify_blocking("senha-forte", &hash).await);
        assert!(!h.verify_blocking("senha-fraca", &hash).await);
    }
}
