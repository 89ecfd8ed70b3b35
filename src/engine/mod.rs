// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential and Session Engine
//!
//! [`AuthEngine`] exposes the operations the HTTP layer calls:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `register` | create an unverified user, mail a verification link |
//! | `verify_email` | consume the link token, activate the user |
//! | `login` | check credentials and lockout, open a session |
//! | `refresh` | rotate a refresh secret (reuse burns the family) |
//! | `logout` | revoke the caller's session |
//! | `logout_all` | bump `token_version`, revoke every session |
//! | `change_password` | same as `logout_all`, plus the new hash |
//! | `current_user` | profile of the authenticated caller |
//!
//! Security-relevant failures (lockout, reuse, version mismatch) are both
//! returned and written to the audit log.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use url::Url;

pub mod credentials;
pub mod issuer;
pub mod ledger;

pub use credentials::{normalize_email, CredentialStore, Registration};
pub use issuer::{IssuedSession, PendingIssue, Rotation, TokenIssuer};
pub use ledger::RefreshLedger;

use crate::auth::{AuthError, AuthGate, AuthenticatedUser, PasswordService, SecretHasher, TokenSigner};
use crate::config::AuthConfig;
use crate::context::ClientContext;
use crate::mail::Mailer;
use crate::models::CurrentUser;
use crate::storage::{AuditEvent, AuditEventKind, AuditLog, AuthStore, UserRecord, UserStatus};

/// Successful login: the new pair plus the signed-in user.
#[derive(Debug)]
pub struct LoginOutcome {
    pub issued: IssuedSession,
    pub user: UserRecord,
}

pub struct AuthEngine {
    store: AuthStore,
    credentials: CredentialStore,
    issuer: TokenIssuer,
    ledger: RefreshLedger,
    gate: AuthGate,
    audit: AuditLog,
    mailer: Arc<dyn Mailer>,
    client_url: Url,
}

impl AuthEngine {
    pub fn new(
        config: &AuthConfig,
        store: AuthStore,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, AuthError> {
        let signer = Arc::new(TokenSigner::new(&config.jwt_secret, config.access_ttl));
        let hasher = SecretHasher::new(&config.refresh_pepper)?;
        let passwords = PasswordService::new(config.password_memory_kib, config.password_iterations)?;
        let audit = AuditLog::new(store.clone());

        let credentials = CredentialStore::new(store.clone(), passwords, hasher.clone());
        let issuer = TokenIssuer::new(
            store.clone(),
            signer.clone(),
            hasher.clone(),
            config.refresh_ttl,
            config.session_ttl,
        );
        let ledger = RefreshLedger::new(store.clone(), hasher, issuer.clone(), audit.clone());
        let gate = AuthGate::new(store.clone(), signer, audit.clone());

        Ok(Self {
            store,
            credentials,
            issuer,
            ledger,
            gate,
            audit,
            mailer,
            client_url: config.client_url.clone(),
        })
    }

    /// Request-time access-token gate.
    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn store(&self) -> &AuthStore {
        &self.store
    }

    /// Register a new identity and send the verification link.
    ///
    /// A mail failure is logged and does not undo the registration.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        client: &ClientContext,
    ) -> Result<UserRecord, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::CredentialsRequired);
        }

        let Registration { user, verify_token } =
            self.credentials.register(email, password, display_name).await?;

        match self.verification_link(&verify_token) {
            Ok(link) => {
                if let Err(e) = self.mailer.send_verification(&user.email, &link) {
                    tracing::warn!(user_id = %user.id, error = %e, "Verification email not sent");
                }
            }
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Could not build verification link")
            }
        }

        self.audit
            .append(
                AuditEvent::new(AuditEventKind::RegisterSuccess)
                    .with_user(&user.id)
                    .with_client(client)
                    .with_meta(json!({ "email": user.email })),
            )
            .await;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    fn verification_link(&self, token: &str) -> Result<Url, url::ParseError> {
        let base = self.client_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/verify/{token}"))
    }

    /// Consume a verification token.
    pub async fn verify_email(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> Result<UserRecord, AuthError> {
        let user = self.credentials.mark_verified(token).await?;
        self.audit
            .append(
                AuditEvent::new(AuditEventKind::VerifyEmailSuccess)
                    .with_user(&user.id)
                    .with_client(client),
            )
            .await;
        Ok(user)
    }

    /// Password sign-in.
    ///
    /// Checks run in a fixed order: unknown email, running lockout, wrong
    /// password, unverified email, disallowed status. A running lockout
    /// refuses even the correct password.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<LoginOutcome, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::CredentialsRequired);
        }
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let Some(user) = self.credentials.find_by_email(&email).await? else {
            self.credentials.verify_missing_account(password).await?;
            self.login_failed(None, client, json!({ "reason": "USER_NOT_FOUND", "email": email }))
                .await;
            return Err(AuthError::InvalidCredentials);
        };

        if user.is_locked(Utc::now()) {
            self.login_failed(Some(&user.id), client, json!({ "reason": "ACCOUNT_LOCKED" }))
                .await;
            return Err(AuthError::AccountLocked);
        }

        if !self.credentials.verify_password(&user, password).await? {
            let updated = self.credentials.record_failed_attempt(&user.id).await?;
            self.login_failed(
                Some(&user.id),
                client,
                json!({ "reason": "BAD_PASSWORD", "failedLoginCount": updated.failed_login_count }),
            )
            .await;

            if updated.is_locked(Utc::now()) {
                tracing::warn!(
                    user_id = %user.id,
                    failed_login_count = updated.failed_login_count,
                    "Account locked after repeated failed logins"
                );
                self.audit
                    .append(
                        AuditEvent::new(AuditEventKind::AccountLocked)
                            .with_user(&user.id)
                            .with_client(client)
                            .with_meta(json!({ "lockUntil": updated.lock_until })),
                    )
                    .await;
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !user.email_verified {
            self.login_failed(Some(&user.id), client, json!({ "reason": "EMAIL_NOT_VERIFIED" }))
                .await;
            return Err(AuthError::EmailNotVerified);
        }

        if !matches!(user.status, UserStatus::Active | UserStatus::Locked) {
            self.login_failed(
                Some(&user.id),
                client,
                json!({ "reason": "INVALID_STATUS", "status": user.status }),
            )
            .await;
            return Err(AuthError::AccountNotAllowed);
        }

        let user = self.credentials.record_successful_login(&user.id, client).await?;
        let issued = self.issuer.issue_session(&user, client, None).await?;

        self.audit
            .append(
                AuditEvent::new(AuditEventKind::LoginSuccess)
                    .with_user(&user.id)
                    .with_session(&issued.session_id)
                    .with_client(client),
            )
            .await;

        tracing::info!(user_id = %user.id, session_id = %issued.session_id, "Login successful");
        Ok(LoginOutcome { issued, user })
    }

    async fn login_failed(
        &self,
        user_id: Option<&str>,
        client: &ClientContext,
        meta: serde_json::Value,
    ) {
        let mut event = AuditEvent::new(AuditEventKind::LoginFailed)
            .with_client(client)
            .with_meta(meta);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        self.audit.append(event).await;
    }

    /// Rotate a refresh secret.
    pub async fn refresh(
        &self,
        raw_secret: &str,
        client: &ClientContext,
    ) -> Result<IssuedSession, AuthError> {
        let raw_secret = raw_secret.trim();
        if raw_secret.is_empty() {
            return Err(AuthError::RefreshMissing);
        }
        self.ledger.rotate(raw_secret, client).await
    }

    /// Revoke the caller's own session. Tokens without a session id only
    /// produce the audit entry.
    pub async fn logout(
        &self,
        auth: &AuthenticatedUser,
        client: &ClientContext,
    ) -> Result<(), AuthError> {
        match auth.session_id() {
            Some(session_id) => {
                self.ledger.logout(auth.user_id(), session_id, client).await?;
            }
            None => {
                self.audit
                    .append(
                        AuditEvent::new(AuditEventKind::Logout)
                            .with_user(auth.user_id())
                            .with_client(client),
                    )
                    .await;
            }
        }
        Ok(())
    }

    /// Sign out every device of the caller.
    pub async fn logout_all(
        &self,
        auth: &AuthenticatedUser,
        client: &ClientContext,
    ) -> Result<(), AuthError> {
        self.ledger.logout_all(auth.user_id(), client).await?;
        Ok(())
    }

    /// Replace the password and sign out every device.
    pub async fn change_password(
        &self,
        auth: &AuthenticatedUser,
        current_password: &str,
        new_password: &str,
        client: &ClientContext,
    ) -> Result<(), AuthError> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(AuthError::PasswordFieldsRequired);
        }
        PasswordService::validate_policy(new_password)?;

        let user = self
            .credentials
            .get(auth.user_id())
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !self.credentials.verify_password(&user, current_password).await? {
            return Err(AuthError::PasswordInvalid);
        }

        let new_hash = self.credentials.hash_password(new_password).await?;
        let (user, revoked) = self
            .ledger
            .revoke_everywhere(&user.id, ledger::reasons::PASSWORD_CHANGED, move |user| {
                user.password_hash = new_hash;
                user.password_changed_at = Some(Utc::now());
            })
            .await?;

        let mut event = AuditEvent::new(AuditEventKind::PasswordChanged)
            .with_user(&user.id)
            .with_client(client)
            .with_meta(json!({
                "revokedSessions": revoked.sessions,
                "revokedTokens": revoked.refresh_tokens,
            }));
        if let Some(session_id) = auth.session_id() {
            event = event.with_session(session_id);
        }
        self.audit.append(event).await;
        Ok(())
    }

    /// Profile of the authenticated caller, as loaded by the gate.
    pub fn current_user(&self, auth: &AuthenticatedUser) -> CurrentUser {
        CurrentUser {
            id: auth.user.id.clone(),
            email: auth.user.email.clone(),
            roles: auth.user.roles.clone(),
            status: auth.user.status,
            email_verified: auth.user.email_verified,
            display_name: auth.user.display_name.clone(),
            session_id: auth.session_id().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;
    use crate::state::tests::test_config;
    use crate::storage::database::tests::temp_db;
    use std::time::Duration;

    fn engine() -> (AuthEngine, Arc<MemoryMailer>, tempfile::TempDir) {
        let (db, dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let mailer = Arc::new(MemoryMailer::new());
        let engine = AuthEngine::new(&test_config(), store, mailer.clone()).unwrap();
        (engine, mailer, dir)
    }

    #[tokio::test]
    async fn register_sends_link_and_verify_activates() {
        let (engine, mailer, _dir) = engine();
        let client = ClientContext::default();

        let user = engine
            .register("New@X.com", "password123", "  New  ", &client)
            .await
            .unwrap();
        assert_eq!(user.email, "new@x.com");
        assert_eq!(user.display_name, "New");
        assert_eq!(user.status, UserStatus::PendingVerify);

        let link = mailer.last_link_for("new@x.com").unwrap();
        assert!(link.as_str().starts_with("http://localhost:5173/verify/"));
        let token = link.path_segments().unwrap().last().unwrap().to_string();

        let err = engine.login("new@x.com", "password123", &client).await.unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));

        let verified = engine.verify_email(&token, &client).await.unwrap();
        assert!(verified.email_verified);
        assert_eq!(verified.status, UserStatus::Active);

        // Single use
        let err = engine.verify_email(&token, &client).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidVerifyToken));

        assert!(engine.login("new@x.com", "password123", &client).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_still_pays_for_a_verification() {
        let (engine, _, _dir) = engine();
        let client = ClientContext::default();
        let err = engine
            .login("ghost@x.com", "password123", &client)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        engine
            .credentials
            .verify_missing_account("password123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn register_rejects_missing_and_short() {
        let (engine, _, _dir) = engine();
        let client = ClientContext::default();
        assert!(matches!(
            engine.register("", "password123", "", &client).await,
            Err(AuthError::CredentialsRequired)
        ));
        assert!(matches!(
            engine.register("a@x.com", "short", "", &client).await,
            Err(AuthError::PasswordTooShort)
        ));
    }

    #[tokio::test]
    async fn logout_without_session_claim_only_audits() {
        let (engine, mailer, _dir) = engine();
        let client = ClientContext::default();
        engine
            .register("a@x.com", "password123", "", &client)
            .await
            .unwrap();
        let link = mailer.last_link_for("a@x.com").unwrap();
        let token = link.path_segments().unwrap().last().unwrap().to_string();
        engine.verify_email(&token, &client).await.unwrap();
        let outcome = engine.login("a@x.com", "password123", &client).await.unwrap();

        let mut auth = engine
            .gate()
            .authenticate(&outcome.issued.access_token, &client)
            .await
            .unwrap();
        auth.claims.sid = None;
        engine.logout(&auth, &client).await.unwrap();

        let session = engine
            .store()
            .database()
            .get_session(&outcome.issued.session_id)
            .unwrap()
            .unwrap();
        assert!(session.is_live(Utc::now()));
    }
}
