// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Password hashing and verification using Argon2id.
//!
//! ## Security
//!
//! - Algorithm: Argon2id, v0x13
//! - Salt: random 16 bytes per password from the OS RNG
//! - Work factor: memory and iteration cost set per install
//!   (`PASSWORD_HASH_MEMORY_KIB`, `PASSWORD_HASH_ITERATIONS`)
//!
//! Hashing is deliberately slow; async callers run it on the blocking pool.
//! Sign-ins for unknown accounts verify against a placeholder hash built
//! with the same work factor, so both paths cost one Argon2 run.

use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use super::AuthError;

/// Minimum password length, counted in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone)]
pub struct PasswordService {
    params: Params,
    placeholder_hash: Arc<str>,
}

impl PasswordService {
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| AuthError::Internal(format!("invalid Argon2 parameters: {e}")))?;
        let mut service = Self {
            params,
            placeholder_hash: Arc::from(""),
        };
        let placeholder = SaltString::generate(&mut OsRng);
        service.placeholder_hash = service.hash(placeholder.as_str())?.into();
        Ok(service)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Reject passwords below the minimum length.
    pub fn validate_policy(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::PasswordTooShort);
        }
        Ok(())
    }

    /// Hash a password into a PHC string.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }

    /// Verify a password against a stored PHC string.
    ///
    /// A mismatch is `Ok(false)`; a malformed hash is an internal error.
    pub fn verify(&self, password: &str, password_hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(password_hash)
            .map_err(|e| AuthError::Internal(format!("invalid password hash format: {e}")))?;

        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(format!(
                "password verification failed: {e}"
            ))),
        }
    }

    /// Spend one verification on the placeholder hash; the outcome is discarded.
    pub fn verify_placeholder(&self, password: &str) {
        if let Err(e) = self.verify(password, &self.placeholder_hash) {
            tracing::warn!(error = %e, "Placeholder password verification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PasswordService {
        PasswordService::new(1024, 1).unwrap()
    }

    #[test]
    fn hash_and_verify() {
        let svc = service();
        let hash = svc.hash("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(svc.verify("correct horse battery", &hash).unwrap());
        assert!(!svc.verify("wrong horse battery", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_different_salts() {
        let svc = service();
        assert_ne!(svc.hash("password123").unwrap(), svc.hash("password123").unwrap());
    }

    #[test]
    fn placeholder_uses_configured_work_factor() {
        let svc = service();
        assert!(svc.placeholder_hash.starts_with("$argon2id$"));
        assert!(svc.placeholder_hash.contains("m=1024,t=1,p=1"));
        svc.verify_placeholder("any-password");
    }

    #[test]
    fn malformed_hash_is_internal() {
        let result = service().verify("password123", "not-a-phc-string");
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[test]
    fn policy_counts_characters() {
        assert!(matches!(
            PasswordService::validate_policy("short"),
            Err(AuthError::PasswordTooShort)
        ));
        assert!(PasswordService::validate_policy("12345678").is_ok());
        assert!(PasswordService::validate_policy("ééééééé").is_err());
    }

    #[test]
    fn rejects_bad_params() {
        assert!(PasswordService::new(1, 0).is_err());
    }
}
