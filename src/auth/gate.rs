// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication gate: admits a request only if its access token is valid
//! against the *live* user and session state.
//!
//! Checks, in order:
//!
//! 1. Bearer token present (`MissingCredential`)
//! 2. Signature and expiry (`InvalidToken`)
//! 3. User exists (`UserNotFound`) and is `ACTIVE` (`UserInactive`)
//! 4. Embedded `ver` equals the stored `token_version` (`TokenVersionStale`)
//! 5. If the token names a session, it exists, belongs to the user, is
//!    `ACTIVE` and unexpired (`SessionInactive`)

use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use serde_json::json;

use super::claims::AuthenticatedUser;
use super::tokens::TokenSigner;
use super::AuthError;
use crate::context::ClientContext;
use crate::storage::{AuditEvent, AuditEventKind, AuditLog, AuthStore};

/// Extract the bearer token from `Authorization`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AuthError::MissingCredential)?;

    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

#[derive(Clone)]
pub struct AuthGate {
    store: AuthStore,
    signer: Arc<TokenSigner>,
    audit: AuditLog,
}

impl AuthGate {
    pub fn new(store: AuthStore, signer: Arc<TokenSigner>, audit: AuditLog) -> Self {
        Self {
            store,
            signer,
            audit,
        }
    }

    /// Run every check against a raw access token.
    pub async fn authenticate(
        &self,
        token: &str,
        client: &ClientContext,
    ) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.signer.verify_access(token)?;

        let user_id = claims.sub.clone();
        let user = self
            .store
            .call(move |db| db.get_user(&user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !user.is_active() {
            return Err(AuthError::UserInactive);
        }

        if claims.ver != user.token_version {
            tracing::warn!(
                user_id = %user.id,
                token_version = claims.ver,
                current_version = user.token_version,
                "Access token version mismatch"
            );
            let mut event = AuditEvent::new(AuditEventKind::TokenVersionMismatch)
                .with_user(&user.id)
                .with_client(client)
                .with_meta(json!({
                    "tokenVersion": claims.ver,
                    "currentVersion": user.token_version,
                }));
            if let Some(sid) = &claims.sid {
                event = event.with_session(sid);
            }
            self.audit.append(event).await;
            return Err(AuthError::TokenVersionStale);
        }

        if let Some(sid) = claims.sid.clone() {
            let session = self.store.call(move |db| db.get_session(&sid)).await?;
            let live = session
                .is_some_and(|s| s.user_id == user.id && s.is_live(Utc::now()));
            if !live {
                return Err(AuthError::SessionInactive);
            }
        }

        Ok(AuthenticatedUser { user, claims })
    }

    /// Authenticate straight from request headers.
    pub async fn authenticate_headers(
        &self,
        headers: &HeaderMap,
        client: &ClientContext,
    ) -> Result<AuthenticatedUser, AuthError> {
        let token = bearer_token(headers)?;
        self.authenticate(token, client).await
    }
}
