// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Refresh-secret cookie policy.
//!
//! The refresh secret travels as an `HttpOnly`, `SameSite=Lax` cookie scoped
//! to the auth routes, with an absolute expiry equal to the refresh record's.
//! `Secure` is set in production.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct RefreshCookie {
    name: String,
    path: String,
    secure: bool,
}

impl RefreshCookie {
    pub fn new(name: impl Into<String>, path: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The refresh secret presented by the client, if any.
    pub fn read(&self, jar: &CookieJar) -> Option<String> {
        jar.get(&self.name)
            .map(|cookie| cookie.value().trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Attach a fresh refresh secret.
    pub fn set(&self, jar: CookieJar, secret: &str, expires_at: DateTime<Utc>) -> CookieJar {
        let mut cookie = self.base(secret.to_string());
        if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at.timestamp()) {
            cookie.set_expires(expires);
        }
        jar.add(cookie)
    }

    /// Tell the client to drop its refresh cookie.
    ///
    /// Always emits the removal cookie, whether or not the request carried
    /// one.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        let mut cookie = self.base(String::new());
        cookie.make_removal();
        jar.add(cookie)
    }

    fn base(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .path(self.path.clone())
            .build()
    }
}
