// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Storage Module
//!
//! Persistent state for the authentication engine, kept in a single redb
//! file under `DATA_DIR`.
//!
//! ## Storage Layout
//!
//! ```text
//! users            user records, unique by normalized email
//! sessions         one row per device sign-in
//! refresh_tokens   every refresh record ever issued, unique by jti and hash
//! audit_log        append-only security events, ordered by time
//! ```
//!
//! ## Important Notes
//!
//! - Raw refresh secrets and passwords are never written; only hashes
//! - All multi-row transitions (rotation, family burn, logout-all) commit
//!   atomically in one write transaction
//! - Every async call goes through [`AuthStore::call`], which bounds it with
//!   the configured timeout

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub mod audit;
pub mod database;
pub mod refresh_tokens;
pub mod sessions;
pub mod users;

pub use audit::{AuditEvent, AuditEventKind, AuditLog};
pub use database::{AuthDatabase, StoreError, StoreResult};
pub use refresh_tokens::{Redemption, RefreshTokenRecord, RefreshTokenState, Revocation};
pub use sessions::{SessionRecord, SessionStatus, SessionWrite};
pub use users::{UserRecord, UserStatus};

/// Async handle to the database.
///
/// redb calls block, so each one runs on the blocking pool. A call that does
/// not finish within `timeout` resolves to [`StoreError::Timeout`]; callers
/// treat that as a failure, never as success.
#[derive(Clone)]
pub struct AuthStore {
    db: Arc<AuthDatabase>,
    timeout: Duration,
}

impl AuthStore {
    pub fn new(db: AuthDatabase, timeout: Duration) -> Self {
        Self {
            db: Arc::new(db),
            timeout,
        }
    }

    /// Open (or create) the database file and wrap it.
    pub fn open(path: &Path, timeout: Duration) -> StoreResult<Self> {
        Ok(Self::new(AuthDatabase::open(path)?, timeout))
    }

    /// Run a blocking database call under the store timeout.
    pub async fn call<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&AuthDatabase) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || f(&db));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Task(join_err.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Direct access for synchronous callers (tests, tooling).
    pub fn database(&self) -> &AuthDatabase {
        &self.db
    }
}
