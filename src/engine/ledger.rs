// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refresh ledger: the rotation protocol and bulk revocation.
//!
//! ## Redemption
//!
//! 1. Hash the presented secret and look the record up
//! 2. Used, revoked or expired record: burn the whole family and its
//!    session, audit, fail with reuse detected
//! 3. User must be active and verified, session live and owned by the user
//! 4. In one transaction: compare-and-swap `used_at`, extend the session and
//!    insert the child record in the same family. The loser of a race fails
//!    without touching the family
//!
//! ```text
//! ISSUED ──redeem──> USED
//!    │
//!    ├──logout / logout-all / password change / reuse──> REVOKED
//!    └──time──> EXPIRED (detected on lookup)
//! ```

use chrono::Utc;
use serde_json::json;

use super::issuer::{IssuedSession, PendingIssue, Rotation, TokenIssuer};
use crate::auth::{AuthError, SecretHasher};
use crate::context::ClientContext;
use crate::storage::{
    AuditEvent, AuditEventKind, AuditLog, AuthStore, Redemption, RefreshTokenState, Revocation,
    UserRecord,
};

/// Revoke reasons written to sessions and refresh records.
pub mod reasons {
    pub const REUSE_OR_INVALID: &str = "REUSE_OR_INVALID";
    pub const USER_LOGOUT: &str = "USER_LOGOUT";
    pub const LOGOUT_ALL: &str = "LOGOUT_ALL";
    pub const PASSWORD_CHANGED: &str = "PASSWORD_CHANGED";
}

#[derive(Clone)]
pub struct RefreshLedger {
    store: AuthStore,
    hasher: SecretHasher,
    issuer: TokenIssuer,
    audit: AuditLog,
}

impl RefreshLedger {
    pub fn new(store: AuthStore, hasher: SecretHasher, issuer: TokenIssuer, audit: AuditLog) -> Self {
        Self {
            store,
            hasher,
            issuer,
            audit,
        }
    }

    /// Redeem a refresh secret for a new pair.
    pub async fn rotate(
        &self,
        raw_secret: &str,
        client: &ClientContext,
    ) -> Result<IssuedSession, AuthError> {
        let token_hash = self.hasher.hash(raw_secret);
        let record = self
            .store
            .call(move |db| db.find_refresh_by_hash(&token_hash))
            .await?
            .ok_or(AuthError::InvalidRefreshToken)?;

        let now = Utc::now();
        let state = record.state(now);
        if state != RefreshTokenState::Issued {
            let family_id = record.family_id.clone();
            let session_id = record.session_id.clone();
            let revoked = self
                .store
                .call(move |db| {
                    db.revoke_family(&family_id, &session_id, reasons::REUSE_OR_INVALID, now)
                })
                .await?;

            tracing::warn!(
                user_id = %record.user_id,
                session_id = %record.session_id,
                family_id = %record.family_id,
                state = ?state,
                revoked_tokens = revoked.refresh_tokens,
                "Refresh token reuse detected, family revoked"
            );
            self.audit
                .append(
                    AuditEvent::new(AuditEventKind::TokenRefreshReuseDetected)
                        .with_user(&record.user_id)
                        .with_session(&record.session_id)
                        .with_client(client)
                        .with_meta(json!({
                            "familyId": record.family_id,
                            "tokenId": record.jti,
                            "state": state,
                            "revokedTokens": revoked.refresh_tokens,
                        })),
                )
                .await;
            return Err(AuthError::RefreshReuseDetected);
        }

        let user_id = record.user_id.clone();
        let user = self.store.call(move |db| db.get_user(&user_id)).await?;
        let user = match user {
            Some(user) if user.is_active() && user.email_verified => user,
            _ => return Err(AuthError::RefreshUserNotAllowed),
        };

        let session_id = record.session_id.clone();
        let session = self.store.call(move |db| db.get_session(&session_id)).await?;
        let live = session.is_some_and(|s| s.user_id == user.id && s.is_live(now));
        if !live {
            return Err(AuthError::SessionExpired);
        }

        let PendingIssue {
            session,
            record: child,
            issued,
        } = self.issuer.prepare(
            &user,
            client,
            Some(Rotation {
                family_id: record.family_id.clone(),
                parent_token_id: record.jti.clone(),
                session_id: record.session_id.clone(),
            }),
            now,
        )?;

        let jti = record.jti.clone();
        let redemption = self
            .store
            .call(move |db| db.redeem_refresh(&jti, now, &session, &child))
            .await?;
        match redemption {
            Redemption::Rotated => {}
            Redemption::AlreadyConsumed => {
                tracing::warn!(
                    user_id = %user.id,
                    token_id = %record.jti,
                    "Concurrent refresh lost the race"
                );
                return Err(AuthError::RefreshAlreadyUsed);
            }
            Redemption::SessionInactive => return Err(AuthError::SessionExpired),
        }

        self.audit
            .append(
                AuditEvent::new(AuditEventKind::TokenRefreshSuccess)
                    .with_user(&user.id)
                    .with_session(&issued.session_id)
                    .with_client(client)
                    .with_meta(json!({
                        "familyId": issued.family_id,
                        "parentTokenId": record.jti,
                    })),
            )
            .await;

        Ok(issued)
    }

    /// Revoke one session and its refresh records.
    pub async fn logout(
        &self,
        user_id: &str,
        session_id: &str,
        client: &ClientContext,
    ) -> Result<Revocation, AuthError> {
        let (uid, sid) = (user_id.to_string(), session_id.to_string());
        let revoked = self
            .store
            .call(move |db| db.revoke_session_tokens(&uid, &sid, reasons::USER_LOGOUT, Utc::now()))
            .await?;

        self.audit
            .append(
                AuditEvent::new(AuditEventKind::Logout)
                    .with_user(user_id)
                    .with_session(session_id)
                    .with_client(client)
                    .with_meta(json!({ "revokedTokens": revoked.refresh_tokens })),
            )
            .await;
        Ok(revoked)
    }

    /// Bump `token_version` and revoke every session and refresh record of
    /// the user.
    pub async fn logout_all(
        &self,
        user_id: &str,
        client: &ClientContext,
    ) -> Result<Revocation, AuthError> {
        let (_, revoked) = self
            .revoke_everywhere(user_id, reasons::LOGOUT_ALL, |_| {})
            .await?;

        self.audit
            .append(
                AuditEvent::new(AuditEventKind::LogoutAll)
                    .with_user(user_id)
                    .with_client(client)
                    .with_meta(json!({
                        "revokedSessions": revoked.sessions,
                        "revokedTokens": revoked.refresh_tokens,
                    })),
            )
            .await;
        Ok(revoked)
    }

    /// Global invalidation with an extra change applied to the user row in
    /// the same transaction.
    pub async fn revoke_everywhere(
        &self,
        user_id: &str,
        reason: &'static str,
        change: impl FnOnce(&mut UserRecord) + Send + 'static,
    ) -> Result<(UserRecord, Revocation), AuthError> {
        let user_id = user_id.to_string();
        let (user, revoked) = self
            .store
            .call(move |db| db.revoke_user_everywhere(&user_id, reason, Utc::now(), change))
            .await?;

        tracing::info!(
            user_id = %user.id,
            reason = reason,
            token_version = user.token_version,
            revoked_sessions = revoked.sessions,
            revoked_tokens = revoked.refresh_tokens,
            "Revoked all sessions for user"
        );
        Ok((user, revoked))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::auth::{AuthGate, TokenSigner};
    use crate::storage::database::tests::temp_db;
    use crate::storage::{SessionStatus, UserStatus};

    struct Fixture {
        store: AuthStore,
        ledger: RefreshLedger,
        issuer: TokenIssuer,
        user: UserRecord,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (db, dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let hasher = SecretHasher::new("pepper").unwrap();
        let signer = Arc::new(TokenSigner::new(
            "test-secret-that-is-at-least-32-chars",
            TimeDelta::minutes(15),
        ));
        let issuer = TokenIssuer::new(
            store.clone(),
            signer,
            hasher.clone(),
            TimeDelta::days(7),
            TimeDelta::days(30),
        );
        let ledger = RefreshLedger::new(
            store.clone(),
            hasher,
            issuer.clone(),
            AuditLog::new(store.clone()),
        );

        let mut user = UserRecord::new("a@x.com".into(), "hash".into(), "A".into());
        user.status = UserStatus::Active;
        user.email_verified = true;
        store.database().insert_user(&user, None).unwrap();

        Fixture {
            store,
            ledger,
            issuer,
            user,
            _dir: dir,
        }
    }

    fn audit_kinds(store: &AuthStore, user_id: &str) -> Vec<AuditEventKind> {
        store
            .database()
            .audit_events_for_user(user_id)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[tokio::test]
    async fn unknown_secret_is_invalid() {
        let f = fixture();
        let err = f
            .ledger
            .rotate("not-a-secret", &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn rotation_chain_links_parents() {
        let f = fixture();
        let client = ClientContext::default();
        let first = f.issuer.issue_session(&f.user, &client, None).await.unwrap();

        let mut secret = first.refresh_secret.clone();
        for _ in 0..3 {
            let next = f.ledger.rotate(&secret, &client).await.unwrap();
            assert_eq!(next.session_id, first.session_id);
            secret = next.refresh_secret;
        }

        let family = f.store.database().list_family(&first.family_id).unwrap();
        assert_eq!(family.len(), 4);
        for pair in family.windows(2) {
            assert_eq!(pair[1].parent_token_id.as_deref(), Some(pair[0].jti.as_str()));
        }
        let used = family.iter().filter(|r| r.used_at.is_some()).count();
        assert_eq!(used, 3);
        assert!(family.last().unwrap().used_at.is_none());
    }

    #[tokio::test]
    async fn replay_burns_family_and_session() {
        let f = fixture();
        let client = ClientContext::default();
        let first = f.issuer.issue_session(&f.user, &client, None).await.unwrap();
        let second = f.ledger.rotate(&first.refresh_secret, &client).await.unwrap();

        let err = f.ledger.rotate(&first.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshReuseDetected));

        let err = f.ledger.rotate(&second.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshReuseDetected));

        let family = f.store.database().list_family(&first.family_id).unwrap();
        assert!(family.iter().all(|r| r.revoked_at.is_some()));
        let session = f.store.database().get_session(&first.session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Revoked);
        assert!(audit_kinds(&f.store, &f.user.id)
            .contains(&AuditEventKind::TokenRefreshReuseDetected));
    }

    /// Issuer sharing the fixture's store and keys with custom lifetimes.
    fn short_lived_issuer(f: &Fixture, refresh_ttl: TimeDelta, session_ttl: TimeDelta) -> TokenIssuer {
        TokenIssuer::new(
            f.store.clone(),
            Arc::new(TokenSigner::new(
                "test-secret-that-is-at-least-32-chars",
                TimeDelta::minutes(15),
            )),
            SecretHasher::new("pepper").unwrap(),
            refresh_ttl,
            session_ttl,
        )
    }

    #[tokio::test]
    async fn expired_unused_record_burns_family_and_session() {
        let f = fixture();
        let client = ClientContext::default();
        let issuer = short_lived_issuer(&f, TimeDelta::milliseconds(1), TimeDelta::days(30));
        let issued = issuer.issue_session(&f.user, &client, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = f.ledger.rotate(&issued.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshReuseDetected));

        let record = f
            .store
            .database()
            .get_refresh_token(&issued.refresh_token_id)
            .unwrap()
            .unwrap();
        assert!(record.used_at.is_none());
        assert!(record.revoked_at.is_some());
        let session = f.store.database().get_session(&issued.session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Revoked);
    }

    #[tokio::test]
    async fn active_but_expired_session_is_refused() {
        let f = fixture();
        let client = ClientContext::default();
        let issuer = short_lived_issuer(&f, TimeDelta::days(7), TimeDelta::milliseconds(1));
        let issued = issuer.issue_session(&f.user, &client, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let session = f.store.database().get_session(&issued.session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        let gate = AuthGate::new(
            f.store.clone(),
            Arc::new(TokenSigner::new(
                "test-secret-that-is-at-least-32-chars",
                TimeDelta::minutes(15),
            )),
            AuditLog::new(f.store.clone()),
        );
        let err = gate.authenticate(&issued.access_token, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionInactive));

        let err = f.ledger.rotate(&issued.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));

        // Refused, not burned
        let record = f
            .store
            .database()
            .get_refresh_token(&issued.refresh_token_id)
            .unwrap()
            .unwrap();
        assert!(record.used_at.is_none());
        assert!(record.revoked_at.is_none());
    }

    #[tokio::test]
    async fn inactive_user_cannot_rotate() {
        let f = fixture();
        let client = ClientContext::default();
        let first = f.issuer.issue_session(&f.user, &client, None).await.unwrap();
        f.store
            .database()
            .update_user(&f.user.id, |u| u.status = UserStatus::Suspended)
            .unwrap();

        let err = f.ledger.rotate(&first.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshUserNotAllowed));

        // Nothing was revoked or consumed
        let record = f
            .store
            .database()
            .get_refresh_token(&first.refresh_token_id)
            .unwrap()
            .unwrap();
        assert!(record.used_at.is_none());
        assert!(record.revoked_at.is_none());
    }

    #[tokio::test]
    async fn logout_revokes_only_that_session() {
        let f = fixture();
        let client = ClientContext::default();
        let phone = f.issuer.issue_session(&f.user, &client, None).await.unwrap();
        let laptop = f.issuer.issue_session(&f.user, &client, None).await.unwrap();

        let revoked = f
            .ledger
            .logout(&f.user.id, &phone.session_id, &client)
            .await
            .unwrap();
        assert_eq!(revoked.sessions, 1);
        assert_eq!(revoked.refresh_tokens, 1);

        assert!(f.ledger.rotate(&laptop.refresh_secret, &client).await.is_ok());
        let err = f.ledger.rotate(&phone.refresh_secret, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshReuseDetected));
    }

    #[tokio::test]
    async fn logout_all_bumps_version_and_revokes_everything() {
        let f = fixture();
        let client = ClientContext::default();
        f.issuer.issue_session(&f.user, &client, None).await.unwrap();
        f.issuer.issue_session(&f.user, &client, None).await.unwrap();

        let revoked = f.ledger.logout_all(&f.user.id, &client).await.unwrap();
        assert_eq!(revoked.sessions, 2);
        assert_eq!(revoked.refresh_tokens, 2);

        let user = f.store.database().get_user(&f.user.id).unwrap().unwrap();
        assert_eq!(user.token_version, f.user.token_version + 1);
        assert!(f
            .store
            .database()
            .list_user_sessions(&f.user.id)
            .unwrap()
            .iter()
            .all(|s| s.status == SessionStatus::Revoked));
        assert!(audit_kinds(&f.store, &f.user.id).contains(&AuditEventKind::LogoutAll));
    }
}
