// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access-token claims and the authenticated request context.

use serde::{Deserialize, Serialize};

use super::roles::Role;
use crate::storage::UserRecord;

/// Claims signed into every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,

    /// Role tags at issuance time
    #[serde(default)]
    pub roles: Vec<Role>,

    /// User `token_version` at issuance time
    pub ver: u64,

    /// Session the token was minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Issued at timestamp
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,

    /// Unique token id
    pub jti: String,
}

/// User admitted by the authentication gate.
///
/// Carries the live user row (re-read on every request, not taken from the
/// token) and the decoded claims.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: UserRecord,
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Session named by the token, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.claims.sid.as_deref()
    }
}
