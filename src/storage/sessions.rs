// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session registry: one row per continuous device sign-in.
//!
//! A session survives refresh rotations (the session id is reused) and only
//! ever moves from `Active` to `Revoked` or `Expired`.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    index_key, owned_ids, read_json, to_json, AuthDatabase, StoreError, StoreResult, SESSIONS,
    USER_SESSIONS,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

/// Stored device session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque random session id (UUID)
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub user_agent: String,
    pub ip: String,
    pub status: SessionStatus,
    /// Absolute expiry, pushed forward on every rotation
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
}

impl SessionRecord {
    /// Active and not past its absolute expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && self.expires_at > now
    }
}

/// How an issuance touches the session registry.
#[derive(Debug, Clone)]
pub enum SessionWrite {
    /// First login on a device.
    Create(SessionRecord),
    /// Rotation: extend expiry and refresh metadata of a still-active session.
    Extend {
        session_id: String,
        user_id: String,
        expires_at: DateTime<Utc>,
        seen_at: DateTime<Utc>,
        ip: String,
        user_agent: String,
    },
}

impl AuthDatabase {
    /// Look up a session by id.
    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let read_txn = self.read()?;
        let table = read_txn.open_table(SESSIONS)?;
        read_json(&table, session_id)
    }

    /// All sessions of a user, any status.
    pub fn list_user_sessions(&self, user_id: &str) -> StoreResult<Vec<SessionRecord>> {
        let read_txn = self.read()?;
        let index = read_txn.open_table(USER_SESSIONS)?;
        let table = read_txn.open_table(SESSIONS)?;

        let mut sessions = Vec::new();
        for session_id in owned_ids(&index, user_id)? {
            if let Some(session) = read_json(&table, &session_id)? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Revoke one active session. Returns whether anything changed.
    pub fn revoke_session(
        &self,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.write(|txn| revoke_session_in(txn, session_id, reason, now))
    }

    /// Mark every active session whose expiry has passed as `Expired`.
    pub fn expire_stale_sessions(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.write(|txn| {
            let mut table = txn.open_table(SESSIONS)?;
            let mut stale = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let session: SessionRecord = serde_json::from_slice(value.value())?;
                if session.status == SessionStatus::Active && session.expires_at <= now {
                    stale.push(session);
                }
            }

            for mut session in stale.iter().cloned() {
                session.status = SessionStatus::Expired;
                let json = to_json(&session)?;
                table.insert(session.session_id.as_str(), json.as_slice())?;
            }
            Ok(stale.len())
        })
    }
}

/// Apply a [`SessionWrite`]. Returns `false` when an extend targets a
/// session that is no longer active.
pub(crate) fn write_session_in(txn: &WriteTransaction, write: &SessionWrite) -> StoreResult<bool> {
    let mut table = txn.open_table(SESSIONS)?;
    match write {
        SessionWrite::Create(session) => {
            if table.get(session.session_id.as_str())?.is_some() {
                return Err(StoreError::Conflict(format!(
                    "session {}",
                    session.session_id
                )));
            }
            let json = to_json(session)?;
            table.insert(session.session_id.as_str(), json.as_slice())?;

            let mut index = txn.open_table(USER_SESSIONS)?;
            let key = index_key(&session.user_id, &session.session_id);
            index.insert(key.as_str(), session.session_id.as_str())?;
            Ok(true)
        }
        SessionWrite::Extend {
            session_id,
            user_id,
            expires_at,
            seen_at,
            ip,
            user_agent,
        } => {
            let Some(mut session): Option<SessionRecord> = read_json(&table, session_id)? else {
                return Ok(false);
            };
            if &session.user_id != user_id || !session.is_live(*seen_at) {
                return Ok(false);
            }
            session.expires_at = *expires_at;
            session.last_seen_at = *seen_at;
            session.ip = ip.clone();
            session.user_agent = user_agent.clone();

            let json = to_json(&session)?;
            table.insert(session_id.as_str(), json.as_slice())?;
            Ok(true)
        }
    }
}

pub(crate) fn revoke_session_in(
    txn: &WriteTransaction,
    session_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let mut table = txn.open_table(SESSIONS)?;
    let Some(mut session): Option<SessionRecord> = read_json(&table, session_id)? else {
        return Ok(false);
    };
    if session.status != SessionStatus::Active {
        return Ok(false);
    }
    session.status = SessionStatus::Revoked;
    session.revoked_at = Some(now);
    session.revoke_reason = Some(reason.to_string());

    let json = to_json(&session)?;
    table.insert(session_id, json.as_slice())?;
    Ok(true)
}

/// Revoke every active session of a user; returns how many changed.
pub(crate) fn revoke_user_sessions_in(
    txn: &WriteTransaction,
    user_id: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let session_ids = {
        let index = txn.open_table(USER_SESSIONS)?;
        owned_ids(&index, user_id)?
    };
    let mut revoked = 0;
    for session_id in session_ids {
        if revoke_session_in(txn, &session_id, reason, now)? {
            revoked += 1;
        }
    }
    Ok(revoked)
}
