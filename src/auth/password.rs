//! Password hashing and verification using Argon2id

use crate::{config::SecurityConfig, error::AppError};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

/// Password hasher with configurable parameters
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Hash of a throwaway password, verified against when there is nothing real to check
    dummy_hash: String,
}

impl PasswordHasher {
    /// Create hasher with the library's default cost (m=19MiB, t=2, p=1)
    pub fn new() -> Self {
        Self::build(Params::DEFAULT)
    }

    /// Create hasher with explicit cost parameters
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AppError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AppError::Config(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Self::build(params))
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        Self::with_params(
            config.password_hash_memory_kib,
            config.password_hash_iterations,
            config.password_hash_parallelism,
        )
    }

    fn build(params: Params) -> Self {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"dummy-password-for-timing", &salt)
            .map(|h| h.to_string())
            .unwrap_or_default();

        Self { argon2, dummy_hash }
    }

    /// Hash a password
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a stored hash
    ///
    /// An unparseable hash still costs one full verification, so a corrupt
    /// record answers in the same time as a wrong password.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored password hash could not be parsed: {:?}", e);
                self.verify_dummy(password);
                false
            }
        }
    }

    /// Spend one verification against the dummy hash (used when no user matched)
    pub fn verify_dummy(&self, password: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(password.as_bytes(), &parsed);
        }
    }

    /// Validate password against policy
    pub fn validate_password_policy(password: &str, config: &SecurityConfig) -> Result<(), AppError> {
        if password.chars().count() < config.password_min_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                config.password_min_length
            )));
        }

        if password.chars().count() > 100 {
            return Err(AppError::validation("Password must be at most 100 characters"));
        }

        Ok(())
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}
