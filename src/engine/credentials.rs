// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential store operations: registration, password checks and the
//! failed-login lockout counter.
//!
//! Counter and status changes go through [`AuthDatabase::update_user`], so
//! concurrent failed logins never lose increments.
//!
//! [`AuthDatabase::update_user`]: crate::storage::AuthDatabase::update_user

use chrono::{DateTime, TimeDelta, Utc};
use unicode_normalization::UnicodeNormalization;

use crate::auth::tokens::VERIFY_TOKEN_BYTES;
use crate::auth::{AuthError, PasswordService, SecretHasher};
use crate::context::ClientContext;
use crate::storage::{AuthStore, StoreError, UserRecord, UserStatus};

/// Failed attempts that trigger a lockout.
pub const LOCKOUT_THRESHOLD: u32 = 5;

/// How long a lockout lasts.
pub const LOCKOUT_DURATION: TimeDelta = TimeDelta::minutes(15);

/// Trim, NFKC-normalize and lowercase an email, then sanity-check its shape.
pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email: String = raw.trim().nfkc().collect::<String>().to_lowercase();

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail);
    };
    let well_formed = !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    if !well_formed {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}

/// A freshly registered user and the raw verification token to mail out.
pub struct Registration {
    pub user: UserRecord,
    pub verify_token: String,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("user_id", &self.user.id)
            .field("verify_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    store: AuthStore,
    passwords: PasswordService,
    hasher: SecretHasher,
}

impl CredentialStore {
    pub fn new(store: AuthStore, passwords: PasswordService, hasher: SecretHasher) -> Self {
        Self {
            store,
            passwords,
            hasher,
        }
    }

    /// Create an unverified user. Only the Argon2id hash of the password and
    /// the keyed hash of the verification token are stored.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Registration, AuthError> {
        PasswordService::validate_policy(password)?;
        let email = normalize_email(email)?;

        let lookup = email.clone();
        if self
            .store
            .call(move |db| db.find_user_by_email(&lookup))
            .await?
            .is_some()
        {
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = self.hash_password(password).await?;
        let user = UserRecord::new(email, password_hash, display_name.trim().to_string());

        let verify_token = self.hasher.generate(VERIFY_TOKEN_BYTES)?;
        let verify_hash = self.hasher.hash(&verify_token);

        let record = user.clone();
        match self
            .store
            .call(move |db| db.insert_user(&record, Some(&verify_hash)))
            .await
        {
            Ok(()) => Ok(Registration { user, verify_token }),
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateIdentity),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        let email = email.to_string();
        Ok(self
            .store
            .call(move |db| db.find_user_by_email(&email))
            .await?)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, AuthError> {
        let user_id = user_id.to_string();
        Ok(self.store.call(move |db| db.get_user(&user_id)).await?)
    }

    /// Check a candidate password against the stored hash.
    pub async fn verify_password(
        &self,
        user: &UserRecord,
        candidate: &str,
    ) -> Result<bool, AuthError> {
        let passwords = self.passwords.clone();
        let candidate = candidate.to_string();
        let hash = user.password_hash.clone();
        tokio::task::spawn_blocking(move || passwords.verify(&candidate, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password task failed: {e}")))?
    }

    /// Burn the same Argon2 cost as a real check when no account matched.
    pub async fn verify_missing_account(&self, candidate: &str) -> Result<(), AuthError> {
        let passwords = self.passwords.clone();
        let candidate = candidate.to_string();
        tokio::task::spawn_blocking(move || passwords.verify_placeholder(&candidate))
            .await
            .map_err(|e| AuthError::Internal(format!("password task failed: {e}")))
    }

    /// Hash a password on the blocking pool.
    pub async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || passwords.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password task failed: {e}")))?
    }

    /// Count a failed attempt; lock the account at the threshold.
    ///
    /// A lock that has already run out does not count toward a new one: the
    /// counter restarts from this attempt.
    pub async fn record_failed_attempt(&self, user_id: &str) -> Result<UserRecord, AuthError> {
        let user_id = user_id.to_string();
        let now = Utc::now();
        Ok(self
            .store
            .call(move |db| db.update_user(&user_id, |user| apply_failed_attempt(user, now)))
            .await?)
    }

    /// Reset the counter and lock, mark the account active and stamp the
    /// last-login metadata.
    pub async fn record_successful_login(
        &self,
        user_id: &str,
        client: &ClientContext,
    ) -> Result<UserRecord, AuthError> {
        let user_id = user_id.to_string();
        let client = client.clone();
        let now = Utc::now();
        Ok(self
            .store
            .call(move |db| {
                db.update_user(&user_id, |user| {
                    user.failed_login_count = 0;
                    user.lock_until = None;
                    user.status = UserStatus::Active;
                    user.last_login_at = Some(now);
                    user.last_login_ip = Some(client.ip);
                    user.last_login_ua = Some(client.user_agent);
                })
            })
            .await?)
    }

    /// Consume a verification token and mark the owner verified.
    pub async fn mark_verified(&self, raw_token: &str) -> Result<UserRecord, AuthError> {
        let token = raw_token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidVerifyToken);
        }
        let token_hash = self.hasher.hash(token);
        self.store
            .call(move |db| db.consume_verify_token(&token_hash, Utc::now()))
            .await?
            .ok_or(AuthError::InvalidVerifyToken)
    }
}

fn apply_failed_attempt(user: &mut UserRecord, now: DateTime<Utc>) {
    if user.lock_until.is_some_and(|until| until <= now) {
        user.failed_login_count = 0;
        user.lock_until = None;
    }
    user.failed_login_count += 1;
    if user.failed_login_count >= LOCKOUT_THRESHOLD {
        user.lock_until = Some(now + LOCKOUT_DURATION);
        user.status = UserStatus::Locked;
    }
}
