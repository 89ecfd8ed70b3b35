// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Applied with `from_fn_with_state` to the protected route group; on success
//! the resolved [`AuthenticatedUser`] is placed in the request extensions,
//! where the [`super::Auth`] extractor picks it up.
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/me", get(me))
//!     .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_auth));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AuthenticatedUser;
use crate::context::ClientContext;
use crate::state::AppState;

/// Reject the request unless the gate admits it.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0);
    let client = ClientContext::from_headers(request.headers(), peer);

    match state
        .engine
        .gate()
        .authenticate_headers(request.headers(), &client)
        .await
    {
        Ok(user) => {
            request.extensions_mut().insert::<AuthenticatedUser>(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
