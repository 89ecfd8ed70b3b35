// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded credential/session database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized UserRecord
//! - `user_emails`: normalized email → user_id (unique identity)
//! - `verify_tokens`: hashed verification token → user_id
//! - `sessions`: session_id → serialized SessionRecord
//! - `user_sessions`: `user_id|session_id` → session_id
//! - `refresh_tokens`: jti → serialized RefreshTokenRecord
//! - `refresh_hashes`: token_hash → jti (unique)
//! - `refresh_families`: `family_id|jti` → jti
//! - `user_refresh_tokens`: `user_id|jti` → jti
//! - `audit_log`: `micros|event_id` → serialized AuditEvent
//! - `user_audit`: `user_id|micros|event_id` → audit key
//!
//! redb admits a single write transaction at a time, so every
//! read-check-write sequence run inside [`AuthDatabase::write`] is a
//! conditional update: no other writer can interleave between the check
//! and the commit.

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::{de::DeserializeOwned, Serialize};

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USER_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("user_emails");
pub(crate) const VERIFY_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("verify_tokens");

pub(crate) const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
pub(crate) const USER_SESSIONS: TableDefinition<&str, &str> =
    TableDefinition::new("user_sessions");

pub(crate) const REFRESH_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("refresh_tokens");
pub(crate) const REFRESH_HASHES: TableDefinition<&str, &str> =
    TableDefinition::new("refresh_hashes");
pub(crate) const REFRESH_FAMILIES: TableDefinition<&str, &str> =
    TableDefinition::new("refresh_families");
pub(crate) const USER_REFRESH_TOKENS: TableDefinition<&str, &str> =
    TableDefinition::new("user_refresh_tokens");

pub(crate) const AUDIT_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");
pub(crate) const USER_AUDIT: TableDefinition<&str, &str> = TableDefinition::new("user_audit");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Composite key `owner|id` for secondary index tables.
pub(crate) fn index_key(owner: &str, id: &str) -> String {
    format!("{owner}|{id}")
}

/// Half-open key range covering every `owner|…` entry.
///
/// `}` is the byte right after `|`, so `owner}` bounds the prefix. Owner ids
/// are UUIDs and never contain either byte.
pub(crate) fn owner_range(owner: &str) -> (String, String) {
    (format!("{owner}|"), format!("{owner}}}"))
}

/// Read and decode a JSON row.
pub(crate) fn read_json<T, R>(table: &R, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Collect the values of every index entry under `owner`.
pub(crate) fn owned_ids<R>(table: &R, owner: &str) -> StoreResult<Vec<String>>
where
    R: ReadableTable<&'static str, &'static str>,
{
    let (start, end) = owner_range(owner);
    let mut ids = Vec::new();
    for entry in table.range(start.as_str()..end.as_str())? {
        let (_, value) = entry?;
        ids.push(value.value().to_string());
    }
    Ok(ids)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

// =============================================================================
// AuthDatabase
// =============================================================================

/// Embedded ACID database holding users, sessions, refresh records and the
/// audit trail.
pub struct AuthDatabase {
    db: Database,
}

impl AuthDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USER_EMAILS)?;
            let _ = write_txn.open_table(VERIFY_TOKENS)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(USER_SESSIONS)?;
            let _ = write_txn.open_table(REFRESH_TOKENS)?;
            let _ = write_txn.open_table(REFRESH_HASHES)?;
            let _ = write_txn.open_table(REFRESH_FAMILIES)?;
            let _ = write_txn.open_table(USER_REFRESH_TOKENS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
            let _ = write_txn.open_table(USER_AUDIT)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Run `f` inside one write transaction; commit on `Ok`, abort on `Err`.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let txn = self.db.begin_write()?;
        match f(&txn) {
            Ok(out) => {
                txn.commit()?;
                Ok(out)
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }

    pub(crate) fn read(&self) -> StoreResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    /// Cheap liveness probe used by the readiness endpoint.
    pub fn ping(&self) -> StoreResult<()> {
        let read_txn = self.read()?;
        let _ = read_txn.open_table(USERS)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn temp_db() -> (AuthDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = AuthDatabase::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn open_creates_tables() {
        let (db, _dir) = temp_db();
        db.ping().unwrap();
    }

    #[test]
    fn owner_range_excludes_neighbouring_owners() {
        let (db, _dir) = temp_db();
        db.write(|txn| {
            let mut table = txn.open_table(USER_SESSIONS)?;
            table.insert(index_key("user-a", "s1").as_str(), "s1")?;
            table.insert(index_key("user-a", "s2").as_str(), "s2")?;
            table.insert(index_key("user-ab", "s3").as_str(), "s3")?;
            table.insert(index_key("user-", "s4").as_str(), "s4")?;
            Ok(())
        })
        .unwrap();

        let read_txn = db.read().unwrap();
        let table = read_txn.open_table(USER_SESSIONS).unwrap();
        let ids = owned_ids(&table, "user-a").unwrap();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let (db, _dir) = temp_db();
        let result: StoreResult<()> = db.write(|txn| {
            let mut table = txn.open_table(USER_EMAILS)?;
            table.insert("a@x.com", "u1")?;
            Err(StoreError::Conflict("forced".into()))
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let read_txn = db.read().unwrap();
        let table = read_txn.open_table(USER_EMAILS).unwrap();
        assert!(table.get("a@x.com").unwrap().is_none());
    }
}
