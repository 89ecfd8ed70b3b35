// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-relevant events.
//!
//! Entries are append-only and never updated. They are keyed by creation
//! time so the retention sweep is a single range delete.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{
    index_key, owned_ids, read_json, to_json, AuthDatabase, StoreResult, AUDIT_LOG, USER_AUDIT,
};
use super::AuthStore;
use crate::context::ClientContext;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    RegisterSuccess,
    VerifyEmailSuccess,
    LoginSuccess,
    LoginFailed,
    AccountLocked,
    TokenRefreshSuccess,
    TokenRefreshReuseDetected,
    TokenVersionMismatch,
    Logout,
    LogoutAll,
    PasswordChanged,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
    /// Type of event.
    pub kind: AuditEventKind,
    /// User concerned (if known).
    pub user_id: Option<String>,
    /// Session concerned (if any).
    pub session_id: Option<String>,
    /// IP address of the request.
    pub ip: Option<String>,
    /// User-agent of the request.
    pub user_agent: Option<String>,
    /// Free-form details.
    #[schema(value_type = Object)]
    pub meta: serde_json::Value,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            kind,
            user_id: None,
            session_id: None,
            ip: None,
            user_agent: None,
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the session ID.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Copy IP and user-agent from the request.
    pub fn with_client(mut self, client: &ClientContext) -> Self {
        self.ip = Some(client.ip.clone());
        self.user_agent = Some(client.user_agent.clone());
        self
    }

    /// Add details.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    fn storage_key(&self) -> String {
        time_key(self.created_at, &self.event_id)
    }
}

/// `micros|event_id`, zero-padded so lexical order is time order.
fn time_key(at: DateTime<Utc>, event_id: &str) -> String {
    format!("{:020}|{event_id}", at.timestamp_micros().max(0))
}

impl AuthDatabase {
    /// Append one event.
    pub fn append_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        let json = to_json(event)?;
        let key = event.storage_key();
        self.write(|txn| {
            let mut table = txn.open_table(AUDIT_LOG)?;
            table.insert(key.as_str(), json.as_slice())?;
            if let Some(user_id) = &event.user_id {
                let mut by_user = txn.open_table(USER_AUDIT)?;
                by_user.insert(index_key(user_id, &key).as_str(), key.as_str())?;
            }
            Ok(())
        })
    }

    /// Every event recorded for a user, oldest first.
    pub fn audit_events_for_user(&self, user_id: &str) -> StoreResult<Vec<AuditEvent>> {
        let read_txn = self.read()?;
        let by_user = read_txn.open_table(USER_AUDIT)?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let mut events = Vec::new();
        for key in owned_ids(&by_user, user_id)? {
            if let Some(event) = read_json(&table, &key)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Delete events created before `cutoff`; returns how many were removed.
    pub fn purge_audit_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let end = format!("{:020}|", cutoff.timestamp_micros().max(0));
        self.write(|txn| {
            let mut table = txn.open_table(AUDIT_LOG)?;
            let mut expired = Vec::new();
            for entry in table.range(..end.as_str())? {
                let (key, value) = entry?;
                let event: AuditEvent = serde_json::from_slice(value.value())?;
                expired.push((key.value().to_string(), event.user_id));
            }

            let mut by_user = txn.open_table(USER_AUDIT)?;
            for (key, user_id) in &expired {
                table.remove(key.as_str())?;
                if let Some(user_id) = user_id {
                    by_user.remove(index_key(user_id, key).as_str())?;
                }
            }
            Ok(expired.len())
        })
    }
}

/// Append-only audit sink.
///
/// A failed write never fails the operation being audited; it is reported
/// on the `audit` tracing target instead.
#[derive(Clone)]
pub struct AuditLog {
    store: AuthStore,
}

impl AuditLog {
    pub fn new(store: AuthStore) -> Self {
        Self { store }
    }

    pub async fn append(&self, event: AuditEvent) {
        let kind = event.kind;
        let event_id = event.event_id.clone();
        if let Err(e) = self.store.call(move |db| db.append_audit(&event)).await {
            tracing::error!(
                target: "audit",
                error = %e,
                kind = ?kind,
                event_id = %event_id,
                "Failed to write audit event"
            );
        }
    }
}
