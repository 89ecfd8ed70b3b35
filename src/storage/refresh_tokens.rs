// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refresh ledger: every refresh secret ever issued, stored by hash.
//!
//! Records are chained into rotation families (`family_id`) through
//! `parent_token_id`. The lineage lives entirely in these rows, keyed by
//! `jti`, so it survives restarts.
//!
//! ## State machine
//!
//! ```text
//! ISSUED ──redeem──▶ USED
//!    │
//!    ├──logout / logout-all / password change / reuse──▶ REVOKED
//!    └──time──▶ EXPIRED (derived on lookup)
//! ```

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::database::{
    index_key, owned_ids, read_json, to_json, AuthDatabase, StoreError, StoreResult,
    REFRESH_FAMILIES, REFRESH_HASHES, REFRESH_TOKENS, SESSIONS, USER_REFRESH_TOKENS,
};
use super::sessions::{
    revoke_session_in, revoke_user_sessions_in, write_session_in, SessionRecord, SessionWrite,
};
use super::users::{update_user_in, UserRecord};

/// One issued refresh secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Unique record id (UUID)
    pub jti: String,
    pub user_id: String,
    pub session_id: String,
    /// Keyed hash of the secret; the secret itself is never stored
    pub token_hash: String,
    /// Shared by every record descended from one login
    pub family_id: String,
    /// Record this one was rotated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_token_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    pub created_by_ip: String,
    pub created_by_ua: String,
}

/// Derived state of a refresh record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshTokenState {
    Issued,
    Used,
    Revoked,
    Expired,
}

impl RefreshTokenRecord {
    /// Revocation wins over use, use wins over expiry.
    pub fn state(&self, now: DateTime<Utc>) -> RefreshTokenState {
        if self.revoked_at.is_some() {
            RefreshTokenState::Revoked
        } else if self.used_at.is_some() {
            RefreshTokenState::Used
        } else if self.expires_at <= now {
            RefreshTokenState::Expired
        } else {
            RefreshTokenState::Issued
        }
    }
}

/// Outcome of [`AuthDatabase::redeem_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    /// Parent marked used, child issued
    Rotated,
    /// Parent was already used or revoked when the write ran
    AlreadyConsumed,
    /// Session behind the parent is no longer active
    SessionInactive,
}

/// Counts from a bulk revocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revocation {
    pub sessions: usize,
    pub refresh_tokens: usize,
}

impl AuthDatabase {
    /// Persist one issuance: the session upsert and the new refresh record
    /// commit together.
    ///
    /// Returns `false` (and writes nothing) when a rotation targets a
    /// session that is no longer active.
    pub fn persist_issuance(
        &self,
        session: &SessionWrite,
        record: &RefreshTokenRecord,
    ) -> StoreResult<bool> {
        self.write(|txn| {
            if !write_session_in(txn, session)? {
                return Ok(false);
            }
            insert_refresh_in(txn, record)?;
            Ok(true)
        })
    }

    /// Find a record by the hash of its secret.
    pub fn find_refresh_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let read_txn = self.read()?;
        let hashes = read_txn.open_table(REFRESH_HASHES)?;
        let jti = match hashes.get(token_hash)? {
            Some(jti) => jti.value().to_string(),
            None => return Ok(None),
        };
        let table = read_txn.open_table(REFRESH_TOKENS)?;
        read_json(&table, &jti)
    }

    pub fn get_refresh_token(&self, jti: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let read_txn = self.read()?;
        let table = read_txn.open_table(REFRESH_TOKENS)?;
        read_json(&table, jti)
    }

    /// All records of a rotation family, oldest first.
    pub fn list_family(&self, family_id: &str) -> StoreResult<Vec<RefreshTokenRecord>> {
        let read_txn = self.read()?;
        let families = read_txn.open_table(REFRESH_FAMILIES)?;
        let table = read_txn.open_table(REFRESH_TOKENS)?;

        let mut records = Vec::new();
        for jti in owned_ids(&families, family_id)? {
            if let Some(record) = read_json::<RefreshTokenRecord, _>(&table, &jti)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.issued_at);
        Ok(records)
    }

    /// Redeem `jti` and issue its child in one transaction.
    ///
    /// The parent's session must still be live and owned by the same user;
    /// then `used_at` is swapped from null, the session extended and the
    /// child inserted. On any other outcome nothing is written.
    pub fn redeem_refresh(
        &self,
        jti: &str,
        now: DateTime<Utc>,
        session: &SessionWrite,
        child: &RefreshTokenRecord,
    ) -> StoreResult<Redemption> {
        self.write(|txn| {
            let session_live = {
                let sessions = txn.open_table(SESSIONS)?;
                read_json::<SessionRecord, _>(&sessions, &child.session_id)?
                    .is_some_and(|s| s.user_id == child.user_id && s.is_live(now))
            };
            if !session_live {
                return Ok(Redemption::SessionInactive);
            }
            if !mark_used_in(txn, jti, now)? {
                return Ok(Redemption::AlreadyConsumed);
            }
            if !write_session_in(txn, session)? {
                return Err(StoreError::Conflict(format!(
                    "session {} changed during redemption",
                    child.session_id
                )));
            }
            insert_refresh_in(txn, child)?;
            Ok(Redemption::Rotated)
        })
    }

    /// Burn a family after reuse: revoke every live record in it and the
    /// session it backs, in one transaction.
    pub fn revoke_family(
        &self,
        family_id: &str,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Revocation> {
        self.write(|txn| {
            let jtis = {
                let families = txn.open_table(REFRESH_FAMILIES)?;
                owned_ids(&families, family_id)?
            };
            let refresh_tokens = revoke_records_in(txn, &jtis, |_| true, reason, now)?;
            let sessions = usize::from(revoke_session_in(txn, session_id, reason, now)?);
            Ok(Revocation {
                sessions,
                refresh_tokens,
            })
        })
    }

    /// Single-device logout: revoke one session and its refresh records.
    pub fn revoke_session_tokens(
        &self,
        user_id: &str,
        session_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Revocation> {
        self.write(|txn| {
            let jtis = {
                let index = txn.open_table(USER_REFRESH_TOKENS)?;
                owned_ids(&index, user_id)?
            };
            let refresh_tokens =
                revoke_records_in(txn, &jtis, |r| r.session_id == session_id, reason, now)?;
            let sessions = usize::from(revoke_session_in(txn, session_id, reason, now)?);
            Ok(Revocation {
                sessions,
                refresh_tokens,
            })
        })
    }

    /// Global invalidation for a user: apply `change` to the user row (which
    /// bumps `token_version`), then revoke every active session and every
    /// live refresh record, all in one transaction.
    pub fn revoke_user_everywhere(
        &self,
        user_id: &str,
        reason: &str,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut UserRecord),
    ) -> StoreResult<(UserRecord, Revocation)> {
        self.write(|txn| {
            let user = update_user_in(txn, user_id, |user| {
                change(user);
                user.token_version += 1;
            })?;
            let sessions = revoke_user_sessions_in(txn, user_id, reason, now)?;
            let jtis = {
                let index = txn.open_table(USER_REFRESH_TOKENS)?;
                owned_ids(&index, user_id)?
            };
            let refresh_tokens = revoke_records_in(txn, &jtis, |_| true, reason, now)?;
            Ok((
                user,
                Revocation {
                    sessions,
                    refresh_tokens,
                },
            ))
        })
    }
}

fn mark_used_in(txn: &WriteTransaction, jti: &str, now: DateTime<Utc>) -> StoreResult<bool> {
    let mut table = txn.open_table(REFRESH_TOKENS)?;
    let Some(mut record): Option<RefreshTokenRecord> = read_json(&table, jti)? else {
        return Ok(false);
    };
    if record.used_at.is_some() || record.revoked_at.is_some() {
        return Ok(false);
    }
    record.used_at = Some(now);
    let json = to_json(&record)?;
    table.insert(jti, json.as_slice())?;
    Ok(true)
}

fn insert_refresh_in(txn: &WriteTransaction, record: &RefreshTokenRecord) -> StoreResult<()> {
    let mut hashes = txn.open_table(REFRESH_HASHES)?;
    if hashes.get(record.token_hash.as_str())?.is_some() {
        return Err(StoreError::Conflict("refresh token hash".to_string()));
    }
    let mut table = txn.open_table(REFRESH_TOKENS)?;
    if table.get(record.jti.as_str())?.is_some() {
        return Err(StoreError::Conflict(format!("refresh token {}", record.jti)));
    }

    let json = to_json(record)?;
    table.insert(record.jti.as_str(), json.as_slice())?;
    hashes.insert(record.token_hash.as_str(), record.jti.as_str())?;

    let mut families = txn.open_table(REFRESH_FAMILIES)?;
    let family_key = index_key(&record.family_id, &record.jti);
    families.insert(family_key.as_str(), record.jti.as_str())?;

    let mut by_user = txn.open_table(USER_REFRESH_TOKENS)?;
    let user_key = index_key(&record.user_id, &record.jti);
    by_user.insert(user_key.as_str(), record.jti.as_str())?;
    Ok(())
}

/// Revoke the not-yet-revoked records among `jtis` matching `filter`.
/// Already-revoked records keep their original reason.
fn revoke_records_in(
    txn: &WriteTransaction,
    jtis: &[String],
    filter: impl Fn(&RefreshTokenRecord) -> bool,
    reason: &str,
    now: DateTime<Utc>,
) -> StoreResult<usize> {
    let mut table = txn.open_table(REFRESH_TOKENS)?;
    let mut revoked = 0;
    for jti in jtis {
        let Some(mut record): Option<RefreshTokenRecord> = read_json(&table, jti)? else {
            continue;
        };
        if record.revoked_at.is_some() || !filter(&record) {
            continue;
        }
        record.revoked_at = Some(now);
        record.revoke_reason = Some(reason.to_string());
        let json = to_json(&record)?;
        table.insert(jti.as_str(), json.as_slice())?;
        revoked += 1;
    }
    Ok(revoked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::tests::temp_db;
    use crate::storage::sessions::tests::sample_session;
    use crate::storage::sessions::{SessionRecord, SessionStatus};
    use crate::storage::users::UserRecord;
    use chrono::Duration;
    use std::sync::Arc;

    fn record(session: &SessionRecord, family: &str, parent: Option<&str>) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord {
            jti: uuid::Uuid::new_v4().to_string(),
            user_id: session.user_id.clone(),
            session_id: session.session_id.clone(),
            token_hash: uuid::Uuid::new_v4().to_string(),
            family_id: family.to_string(),
            parent_token_id: parent.map(str::to_string),
            issued_at: now,
            expires_at: now + Duration::days(7),
            used_at: None,
            revoked_at: None,
            revoke_reason: None,
            created_by_ip: "127.0.0.1".to_string(),
            created_by_ua: "test".to_string(),
        }
    }

    fn seeded() -> (AuthDatabase, tempfile::TempDir, SessionRecord, RefreshTokenRecord) {
        let (db, dir) = temp_db();
        let session = sample_session("user-1", Duration::days(30));
        let first = record(&session, "family-1", None);
        assert!(db
            .persist_issuance(&SessionWrite::Create(session.clone()), &first)
            .unwrap());
        (db, dir, session, first)
    }

    #[test]
    fn state_precedence() {
        let session = sample_session("user-1", Duration::days(1));
        let mut rec = record(&session, "f", None);
        let now = Utc::now();
        assert_eq!(rec.state(now), RefreshTokenState::Issued);

        rec.expires_at = now - Duration::seconds(1);
        assert_eq!(rec.state(now), RefreshTokenState::Expired);

        rec.used_at = Some(now);
        assert_eq!(rec.state(now), RefreshTokenState::Used);

        rec.revoked_at = Some(now);
        assert_eq!(rec.state(now), RefreshTokenState::Revoked);
    }

    #[test]
    fn find_by_hash_and_unique_hash() {
        let (db, _dir, session, first) = seeded();
        let found = db.find_refresh_by_hash(&first.token_hash).unwrap().unwrap();
        assert_eq!(found.jti, first.jti);

        let mut dup = record(&session, "family-1", None);
        dup.token_hash = first.token_hash.clone();
        let extend = SessionWrite::Extend {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            expires_at: session.expires_at,
            seen_at: Utc::now(),
            ip: session.ip.clone(),
            user_agent: session.user_agent.clone(),
        };
        let result = db.persist_issuance(&extend, &dup);
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(db.get_refresh_token(&dup.jti).unwrap().is_none());
    }

    #[test]
    fn rotation_into_revoked_session_writes_nothing() {
        let (db, _dir, session, first) = seeded();
        db.revoke_session(&session.session_id, "USER_LOGOUT", Utc::now())
            .unwrap();

        let child = record(&session, "family-1", Some(&first.jti));
        let extend = SessionWrite::Extend {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            expires_at: Utc::now() + Duration::days(30),
            seen_at: Utc::now(),
            ip: session.ip.clone(),
            user_agent: session.user_agent.clone(),
        };
        assert!(!db.persist_issuance(&extend, &child).unwrap());
        assert!(db.get_refresh_token(&child.jti).unwrap().is_none());
    }

    #[test]
    fn revoke_family_burns_lineage_and_session() {
        let (db, _dir, session, first) = seeded();
        let extend = SessionWrite::Extend {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            expires_at: session.expires_at,
            seen_at: Utc::now(),
            ip: session.ip.clone(),
            user_agent: session.user_agent.clone(),
        };
        let child = record(&session, "family-1", Some(&first.jti));
        assert!(db.persist_issuance(&extend, &child).unwrap());

        let other_session = sample_session("user-1", Duration::days(30));
        let other = record(&other_session, "family-2", None);
        assert!(db
            .persist_issuance(&SessionWrite::Create(other_session.clone()), &other)
            .unwrap());

        let revocation = db
            .revoke_family("family-1", &session.session_id, "REUSE_OR_INVALID", Utc::now())
            .unwrap();
        assert_eq!(
            revocation,
            Revocation {
                sessions: 1,
                refresh_tokens: 2
            }
        );

        let family = db.list_family("family-1").unwrap();
        assert!(family.iter().all(|r| r.revoked_at.is_some()));
        assert_eq!(
            db.get_session(&session.session_id).unwrap().unwrap().status,
            SessionStatus::Revoked
        );
        assert!(db.get_refresh_token(&other.jti).unwrap().unwrap().revoked_at.is_none());
    }

    #[test]
    fn revoke_user_everywhere_bumps_version() {
        let (db, _dir) = temp_db();
        let user = UserRecord::new("a@x.com".into(), "hash".into(), String::new());
        db.insert_user(&user, None).unwrap();

        let s1 = sample_session(&user.id, Duration::days(30));
        let s2 = sample_session(&user.id, Duration::days(30));
        db.persist_issuance(&SessionWrite::Create(s1.clone()), &record(&s1, "f1", None))
            .unwrap();
        db.persist_issuance(&SessionWrite::Create(s2.clone()), &record(&s2, "f2", None))
            .unwrap();

        let (updated, revocation) = db
            .revoke_user_everywhere(&user.id, "LOGOUT_ALL", Utc::now(), |_| {})
            .unwrap();
        assert_eq!(updated.token_version, 1);
        assert_eq!(revocation.sessions, 2);
        assert_eq!(revocation.refresh_tokens, 2);
        assert!(db
            .list_user_sessions(&user.id)
            .unwrap()
            .iter()
            .all(|s| s.status == SessionStatus::Revoked));
    }

    fn extend(session: &SessionRecord) -> SessionWrite {
        SessionWrite::Extend {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            expires_at: Utc::now() + Duration::days(30),
            seen_at: Utc::now(),
            ip: session.ip.clone(),
            user_agent: session.user_agent.clone(),
        }
    }

    #[test]
    fn redeem_marks_parent_and_inserts_child_together() {
        let (db, _dir, session, first) = seeded();
        let child = record(&session, "family-1", Some(&first.jti));

        let outcome = db
            .redeem_refresh(&first.jti, Utc::now(), &extend(&session), &child)
            .unwrap();
        assert_eq!(outcome, Redemption::Rotated);
        assert!(db.get_refresh_token(&first.jti).unwrap().unwrap().used_at.is_some());
        assert!(db.get_refresh_token(&child.jti).unwrap().is_some());

        let again = record(&session, "family-1", Some(&first.jti));
        let outcome = db
            .redeem_refresh(&first.jti, Utc::now(), &extend(&session), &again)
            .unwrap();
        assert_eq!(outcome, Redemption::AlreadyConsumed);
        assert!(db.get_refresh_token(&again.jti).unwrap().is_none());
    }

    #[test]
    fn redeem_refuses_revoked_parent() {
        let (db, _dir, session, first) = seeded();
        db.write(|txn| {
            let mut table = txn.open_table(REFRESH_TOKENS)?;
            let mut parent: RefreshTokenRecord = read_json(&table, &first.jti)?.unwrap();
            parent.revoked_at = Some(Utc::now());
            table.insert(first.jti.as_str(), to_json(&parent)?.as_slice())?;
            Ok(())
        })
        .unwrap();

        let child = record(&session, "family-1", Some(&first.jti));
        let outcome = db
            .redeem_refresh(&first.jti, Utc::now(), &extend(&session), &child)
            .unwrap();
        assert_eq!(outcome, Redemption::AlreadyConsumed);
        assert!(db.get_refresh_token(&first.jti).unwrap().unwrap().used_at.is_none());
        assert!(db.get_refresh_token(&child.jti).unwrap().is_none());
    }

    #[test]
    fn redeem_against_dead_session_writes_nothing() {
        let (db, _dir, session, first) = seeded();
        db.revoke_session(&session.session_id, "TEST", Utc::now()).unwrap();
        let child = record(&session, "family-1", Some(&first.jti));

        let outcome = db
            .redeem_refresh(&first.jti, Utc::now(), &extend(&session), &child)
            .unwrap();
        assert_eq!(outcome, Redemption::SessionInactive);
        assert!(db.get_refresh_token(&first.jti).unwrap().unwrap().used_at.is_none());
        assert!(db.get_refresh_token(&child.jti).unwrap().is_none());
    }

    #[test]
    fn redeem_has_exactly_one_winner_across_threads() {
        let (db, _dir, session, first) = seeded();
        let db = Arc::new(db);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let session = session.clone();
                let parent = first.jti.clone();
                std::thread::spawn(move || {
                    let child = record(&session, "family-1", Some(&parent));
                    db.redeem_refresh(&parent, Utc::now(), &extend(&session), &child)
                        .unwrap()
                })
            })
            .collect();
        let rotated = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == Redemption::Rotated)
            .count();
        assert_eq!(rotated, 1);
        assert_eq!(db.list_family("family-1").unwrap().len(), 2);
    }
}
