// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User records (the credential store).
//!
//! A user row is only ever mutated through [`AuthDatabase::update_user`],
//! which reads, applies the change and writes back inside one write
//! transaction and bumps `revision`. Counters such as `failed_login_count`
//! and `token_version` therefore never lose updates under concurrent
//! logins.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    read_json, to_json, AuthDatabase, StoreError, StoreResult, USERS, USER_EMAILS, VERIFY_TOKENS,
};
use crate::auth::Role;

/// Account status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// Registered, email not yet verified
    #[default]
    PendingVerify,
    /// May sign in
    Active,
    /// Administratively disabled
    Suspended,
    /// Too many failed logins; see `lock_until`
    Locked,
    /// Soft-deleted, kept while referenced by sessions and tokens
    Deleted,
}

/// Stored user identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique user identifier (UUID)
    pub id: String,
    /// Normalized (trimmed, lowercased) email, unique
    pub email: String,
    /// Argon2id PHC string; never the raw password
    #[serde(default)]
    pub password_hash: String,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Embedded in every access token; bumped on logout-all and password change
    pub token_version: u64,
    pub failed_login_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_ua: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every write
    pub revision: u64,
}

impl UserRecord {
    /// Build a fresh, unverified user.
    pub fn new(email: String, password_hash: String, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash,
            display_name,
            roles: vec![Role::default()],
            status: UserStatus::default(),
            email_verified: false,
            email_verified_at: None,
            token_version: 0,
            failed_login_count: 0,
            lock_until: None,
            password_changed_at: Some(now),
            last_login_at: None,
            last_login_ip: None,
            last_login_ua: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Whether a lockout window is still running.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until > now)
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

impl AuthDatabase {
    /// Insert a new user, enforcing email uniqueness.
    ///
    /// `verify_token_hash`, when given, is indexed so the verification link
    /// can be resolved back to the user.
    pub fn insert_user(&self, user: &UserRecord, verify_token_hash: Option<&str>) -> StoreResult<()> {
        let json = to_json(user)?;
        self.write(|txn| {
            let mut emails = txn.open_table(USER_EMAILS)?;
            if emails.get(user.email.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!("email {}", user.email)));
            }
            let mut users = txn.open_table(USERS)?;
            if users.get(user.id.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!("user {}", user.id)));
            }
            users.insert(user.id.as_str(), json.as_slice())?;
            emails.insert(user.email.as_str(), user.id.as_str())?;

            if let Some(hash) = verify_token_hash {
                let mut tokens = txn.open_table(VERIFY_TOKENS)?;
                tokens.insert(hash, user.id.as_str())?;
            }
            Ok(())
        })
    }

    /// Look up a user by id.
    pub fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let read_txn = self.read()?;
        let table = read_txn.open_table(USERS)?;
        read_json(&table, user_id)
    }

    /// Look up a user by normalized email.
    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let read_txn = self.read()?;
        let emails = read_txn.open_table(USER_EMAILS)?;
        let user_id = match emails.get(email)? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };
        let users = read_txn.open_table(USERS)?;
        read_json(&users, &user_id)
    }

    /// Atomically apply `change` to a stored user and return the new row.
    pub fn update_user(
        &self,
        user_id: &str,
        change: impl FnOnce(&mut UserRecord),
    ) -> StoreResult<UserRecord> {
        self.write(|txn| update_user_in(txn, user_id, change))
    }

    /// Resolve and consume an email-verification token.
    ///
    /// The token row is removed and the user marked verified in the same
    /// transaction; returns `None` for unknown tokens.
    pub fn consume_verify_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>> {
        self.write(|txn| {
            let user_id = {
                let mut tokens = txn.open_table(VERIFY_TOKENS)?;
                let removed = tokens.remove(token_hash)?;
                match removed {
                    Some(id) => id.value().to_string(),
                    None => return Ok(None),
                }
            };
            let user = update_user_in(txn, &user_id, |user| {
                user.email_verified = true;
                user.email_verified_at = Some(now);
                if user.status == UserStatus::PendingVerify {
                    user.status = UserStatus::Active;
                }
            })?;
            Ok(Some(user))
        })
    }
}

/// Read-modify-write of one user row inside an open write transaction.
pub(crate) fn update_user_in(
    txn: &WriteTransaction,
    user_id: &str,
    change: impl FnOnce(&mut UserRecord),
) -> StoreResult<UserRecord> {
    let mut table = txn.open_table(USERS)?;
    let mut user: UserRecord = read_json(&table, user_id)?
        .ok_or_else(|| StoreError::NotFound(format!("User {user_id}")))?;

    change(&mut user);
    user.revision += 1;
    user.updated_at = Utc::now();

    let json = to_json(&user)?;
    table.insert(user_id, json.as_slice())?;
    Ok(user)
}
