// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token issuer: mints an access/refresh pair for a session.
//!
//! Every issuance writes exactly one session upsert and one new refresh
//! record, in a single transaction. Calls are not idempotent.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::auth::tokens::REFRESH_SECRET_BYTES;
use crate::auth::{AuthError, SecretHasher, TokenSigner};
use crate::context::ClientContext;
use crate::storage::{
    AuthStore, RefreshTokenRecord, SessionRecord, SessionStatus, SessionWrite, UserRecord,
};

/// Lineage carried forward when a refresh record is redeemed.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub family_id: String,
    pub parent_token_id: String,
    pub session_id: String,
}

/// Result of one issuance.
pub struct IssuedSession {
    pub access_token: String,
    /// Raw refresh secret. Goes to the client once and is never stored.
    pub refresh_secret: String,
    pub refresh_token_id: String,
    pub session_id: String,
    pub family_id: String,
    pub refresh_expires_at: DateTime<Utc>,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("access_token", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("refresh_token_id", &self.refresh_token_id)
            .field("session_id", &self.session_id)
            .field("family_id", &self.family_id)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// An issuance built but not yet persisted.
pub struct PendingIssue {
    pub session: SessionWrite,
    pub record: RefreshTokenRecord,
    pub issued: IssuedSession,
}

#[derive(Clone)]
pub struct TokenIssuer {
    store: AuthStore,
    signer: Arc<TokenSigner>,
    hasher: SecretHasher,
    refresh_ttl: TimeDelta,
    session_ttl: TimeDelta,
}

impl TokenIssuer {
    pub fn new(
        store: AuthStore,
        signer: Arc<TokenSigner>,
        hasher: SecretHasher,
        refresh_ttl: TimeDelta,
        session_ttl: TimeDelta,
    ) -> Self {
        Self {
            store,
            signer,
            hasher,
            refresh_ttl,
            session_ttl,
        }
    }

    /// Issue a pair for `user`.
    ///
    /// Without `rotation` a new session and a new family are created. With
    /// it, the existing session is extended and the new record is chained to
    /// its parent. Fails with [`AuthError::SessionExpired`] if the session
    /// stopped being active in the meantime; nothing is written in that case.
    pub async fn issue_session(
        &self,
        user: &UserRecord,
        client: &ClientContext,
        rotation: Option<Rotation>,
    ) -> Result<IssuedSession, AuthError> {
        let PendingIssue {
            session,
            record,
            issued,
        } = self.prepare(user, client, rotation, Utc::now())?;

        let persisted = self
            .store
            .call(move |db| db.persist_issuance(&session, &record))
            .await?;
        if !persisted {
            return Err(AuthError::SessionExpired);
        }

        tracing::debug!(
            user_id = %user.id,
            session_id = %issued.session_id,
            family_id = %issued.family_id,
            "Issued access/refresh pair"
        );
        Ok(issued)
    }

    /// Build everything one issuance writes, without writing it.
    ///
    /// The refresh secret is generated and the access token signed here;
    /// the caller persists `session` and `record` in a single transaction.
    pub fn prepare(
        &self,
        user: &UserRecord,
        client: &ClientContext,
        rotation: Option<Rotation>,
        now: DateTime<Utc>,
    ) -> Result<PendingIssue, AuthError> {
        let session_expires_at = now + self.session_ttl;
        let refresh_expires_at = now + self.refresh_ttl;

        let (session, family_id, parent_token_id) = match rotation {
            None => {
                let session = SessionRecord {
                    session_id: uuid::Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    device_id: client.device_id.clone(),
                    user_agent: client.user_agent.clone(),
                    ip: client.ip.clone(),
                    status: SessionStatus::Active,
                    expires_at: session_expires_at,
                    last_seen_at: now,
                    created_at: now,
                    revoked_at: None,
                    revoke_reason: None,
                };
                (
                    SessionWrite::Create(session),
                    uuid::Uuid::new_v4().to_string(),
                    None,
                )
            }
            Some(rotation) => (
                SessionWrite::Extend {
                    session_id: rotation.session_id,
                    user_id: user.id.clone(),
                    expires_at: session_expires_at,
                    seen_at: now,
                    ip: client.ip.clone(),
                    user_agent: client.user_agent.clone(),
                },
                rotation.family_id,
                Some(rotation.parent_token_id),
            ),
        };
        let session_id = match &session {
            SessionWrite::Create(record) => record.session_id.clone(),
            SessionWrite::Extend { session_id, .. } => session_id.clone(),
        };

        let refresh_secret = self.hasher.generate(REFRESH_SECRET_BYTES)?;
        let access_token = self.signer.sign_access(user, &session_id, now)?;

        let record = RefreshTokenRecord {
            jti: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            session_id: session_id.clone(),
            token_hash: self.hasher.hash(&refresh_secret),
            family_id: family_id.clone(),
            parent_token_id,
            issued_at: now,
            expires_at: refresh_expires_at,
            used_at: None,
            revoked_at: None,
            revoke_reason: None,
            created_by_ip: client.ip.clone(),
            created_by_ua: client.user_agent.clone(),
        };

        let issued = IssuedSession {
            access_token,
            refresh_secret,
            refresh_token_id: record.jti.clone(),
            session_id,
            family_id,
            refresh_expires_at,
            expires_in: self.signer.access_ttl().num_seconds(),
        };

        Ok(PendingIssue {
            session,
            record,
            issued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::tests::temp_db;
    use crate::storage::UserStatus;
    use std::time::Duration;

    fn issuer(store: &AuthStore) -> TokenIssuer {
        TokenIssuer::new(
            store.clone(),
            Arc::new(TokenSigner::new(
                "test-secret-that-is-at-least-32-chars",
                TimeDelta::minutes(15),
            )),
            SecretHasher::new("pepper").unwrap(),
            TimeDelta::days(7),
            TimeDelta::days(30),
        )
    }

    fn active_user(store: &AuthStore) -> UserRecord {
        let mut user = UserRecord::new("a@x.com".into(), "hash".into(), "A".into());
        user.status = UserStatus::Active;
        user.email_verified = true;
        store.database().insert_user(&user, None).unwrap();
        user
    }

    #[tokio::test]
    async fn fresh_login_creates_session_and_family() {
        let (db, _dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let user = active_user(&store);
        let issuer = issuer(&store);

        let issued = issuer
            .issue_session(&user, &ClientContext::default(), None)
            .await
            .unwrap();
        assert_eq!(issued.expires_in, 900);
        assert!(!issued.refresh_secret.is_empty());

        let session = store.database().get_session(&issued.session_id).unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.status, SessionStatus::Active);

        let family = store.database().list_family(&issued.family_id).unwrap();
        assert_eq!(family.len(), 1);
        assert!(family[0].parent_token_id.is_none());
        assert_ne!(family[0].token_hash, issued.refresh_secret);
    }

    #[tokio::test]
    async fn rotation_reuses_session_and_chains_parent() {
        let (db, _dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let user = active_user(&store);
        let issuer = issuer(&store);
        let client = ClientContext::default();

        let first = issuer.issue_session(&user, &client, None).await.unwrap();
        let second = issuer
            .issue_session(
                &user,
                &client,
                Some(Rotation {
                    family_id: first.family_id.clone(),
                    parent_token_id: first.refresh_token_id.clone(),
                    session_id: first.session_id.clone(),
                }),
            )
            .await
            .unwrap();

        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.family_id, first.family_id);
        assert_ne!(second.refresh_secret, first.refresh_secret);

        let child = store
            .database()
            .get_refresh_token(&second.refresh_token_id)
            .unwrap()
            .unwrap();
        assert_eq!(child.parent_token_id.as_deref(), Some(first.refresh_token_id.as_str()));
    }

    #[tokio::test]
    async fn rotation_into_revoked_session_writes_nothing() {
        let (db, _dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let user = active_user(&store);
        let issuer = issuer(&store);
        let client = ClientContext::default();

        let first = issuer.issue_session(&user, &client, None).await.unwrap();
        store
            .database()
            .revoke_session(&first.session_id, "TEST", Utc::now())
            .unwrap();

        let err = issuer
            .issue_session(
                &user,
                &client,
                Some(Rotation {
                    family_id: first.family_id.clone(),
                    parent_token_id: first.refresh_token_id.clone(),
                    session_id: first.session_id.clone(),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));
        assert_eq!(store.database().list_family(&first.family_id).unwrap().len(), 1);
    }

    #[test]
    fn debug_redacts_secrets() {
        let issued = IssuedSession {
            access_token: "access".into(),
            refresh_secret: "refresh".into(),
            refresh_token_id: "jti".into(),
            session_id: "sid".into(),
            family_id: "fam".into(),
            refresh_expires_at: Utc::now(),
            expires_in: 900,
        };
        let debug = format!("{issued:?}");
        assert!(!debug.contains("access\""));
        assert!(!debug.contains("\"refresh\""));
        assert!(debug.contains("<redacted>"));
    }
}
