// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated users.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::{AuthError, AuthenticatedUser};
use crate::context::ClientContext;
use crate::state::AppState;

/// Extractor for authenticated users.
///
/// Reuses the user attached by [`super::middleware::require_auth`] when the
/// route is behind it; otherwise runs the gate itself.
pub struct Auth(pub AuthenticatedUser);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }

        let client = match ClientContext::from_request_parts(parts, state).await {
            Ok(client) => client,
            Err(never) => match never {},
        };
        let user = state
            .engine
            .gate()
            .authenticate_headers(&parts.headers, &client)
            .await?;

        Ok(Auth(user))
    }
}
