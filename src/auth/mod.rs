// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Primitives and the request-time gate for first-party password auth.
//!
//! ## Auth Flow
//!
//! 1. Client logs in with email and password
//! 2. Server returns a short-lived HS256 access token in the body and a
//!    long-lived refresh secret in an `HttpOnly` cookie
//! 3. Client sends `Authorization: Bearer <access token>` on every call
//! 4. The gate verifies the token, then re-checks the live user
//!    (`status`, `token_version`) and session on every request
//! 5. When the access token expires, the client trades the refresh secret
//!    for a new pair; each secret works exactly once
//!
//! ## Security
//!
//! - Refresh secrets and verification tokens are stored only as HMAC-SHA256
//!   hashes keyed by a server-side pepper
//! - Passwords are hashed with Argon2id
//! - Bumping `token_version` (logout-all, password change) invalidates every
//!   outstanding access token immediately
//! - No clock skew tolerance: a token is rejected once `exp` has passed

pub mod claims;
pub mod cookies;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod middleware;
pub mod password;
pub mod roles;
pub mod tokens;

pub use claims::{AccessClaims, AuthenticatedUser};
pub use cookies::RefreshCookie;
pub use error::AuthError;
pub use extractor::Auth;
pub use gate::AuthGate;
pub use password::PasswordService;
pub use roles::Role;
pub use tokens::{SecretHasher, TokenSigner};
