// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token primitives.
//!
//! - [`TokenSigner`]: HS256 access tokens carrying user id, roles,
//!   `token_version` and session id.
//! - [`SecretHasher`]: high-entropy random secrets (refresh, email
//!   verification) and their keyed one-way hashes. Only the hash is ever
//!   persisted.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use super::claims::AccessClaims;
use super::AuthError;
use crate::storage::UserRecord;

/// Bytes of entropy in a refresh secret.
pub const REFRESH_SECRET_BYTES: usize = 64;

/// Bytes of entropy in an email verification token.
pub const VERIFY_TOKEN_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies access tokens with a shared secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: TimeDelta,
}

impl TokenSigner {
    pub fn new(secret: &str, access_ttl: TimeDelta) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expired means expired: no skew allowance past `exp`.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
        }
    }

    /// Lifetime of a freshly signed access token.
    pub fn access_ttl(&self) -> TimeDelta {
        self.access_ttl
    }

    /// Sign an access token for `user`, bound to `session_id`.
    pub fn sign_access(
        &self,
        user: &UserRecord,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = AccessClaims {
            sub: user.id.clone(),
            roles: user.roles.clone(),
            ver: user.token_version,
            sid: Some(session_id.to_string()),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("access token signing failed: {e}")))
    }

    /// Verify signature and expiry. Any failure is `InvalidToken`.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AuthError::InvalidToken
            })
    }
}

/// Generates random secrets and hashes them with a server-side pepper.
#[derive(Clone)]
pub struct SecretHasher {
    mac: HmacSha256,
    rng: SystemRandom,
}

impl SecretHasher {
    pub fn new(pepper: &str) -> Result<Self, AuthError> {
        let mac = HmacSha256::new_from_slice(pepper.as_bytes())
            .map_err(|e| AuthError::Internal(format!("invalid pepper: {e}")))?;
        Ok(Self {
            mac,
            rng: SystemRandom::new(),
        })
    }

    /// `len` random bytes, base64url without padding.
    pub fn generate(&self, len: usize) -> Result<String, AuthError> {
        let mut bytes = vec![0u8; len];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AuthError::Internal("system RNG failure".to_string()))?;
        Ok(Base64UrlUnpadded::encode_string(&bytes))
    }

    /// Keyed one-way hash of a secret.
    pub fn hash(&self, raw: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw.as_bytes());
        Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
    }
}
