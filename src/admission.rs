// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admission gate consulted before the unauthenticated auth routes.
//!
//! The engine treats the gate as a pass/fail filter. The default
//! implementation is a keyed token bucket per route family (`governor`):
//!
//! - register, login: keyed by `ip|email`
//! - refresh, verify: keyed by `ip`
//!
//! A bucket holds `max` cells and refills one cell every `window / max`, so
//! at most `max` requests pass per window for a given key.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::config::{RateLimit, RateLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionRoute {
    Register,
    Login,
    Refresh,
    Verify,
}

/// Pass/fail filter in front of the auth routes.
pub trait AdmissionGate: Send + Sync {
    fn admit(&self, route: AdmissionRoute, key: &str) -> bool;

    /// Drop idle keys. Called periodically.
    fn prune(&self) {}
}

/// Admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AdmissionGate for AllowAll {
    fn admit(&self, _route: AdmissionRoute, _key: &str) -> bool {
        true
    }
}

/// Keyed rate limiter, one bucket set per route family.
pub struct RateLimitGate {
    register: DefaultKeyedRateLimiter<String>,
    login: DefaultKeyedRateLimiter<String>,
    refresh: DefaultKeyedRateLimiter<String>,
    verify: DefaultKeyedRateLimiter<String>,
}

impl RateLimitGate {
    pub fn new(limits: &RateLimits) -> Self {
        Self {
            register: RateLimiter::keyed(quota(limits.register)),
            login: RateLimiter::keyed(quota(limits.login)),
            refresh: RateLimiter::keyed(quota(limits.refresh)),
            verify: RateLimiter::keyed(quota(limits.verify)),
        }
    }

    fn limiter(&self, route: AdmissionRoute) -> &DefaultKeyedRateLimiter<String> {
        match route {
            AdmissionRoute::Register => &self.register,
            AdmissionRoute::Login => &self.login,
            AdmissionRoute::Refresh => &self.refresh,
            AdmissionRoute::Verify => &self.verify,
        }
    }
}

fn quota(limit: RateLimit) -> Quota {
    let max = NonZeroU32::new(limit.max).unwrap_or(NonZeroU32::MIN);
    let period = limit.window / max.get();
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(max))
        .allow_burst(max)
}

impl AdmissionGate for RateLimitGate {
    fn admit(&self, route: AdmissionRoute, key: &str) -> bool {
        let allowed = self.limiter(route).check_key(&key.to_string()).is_ok();
        if !allowed {
            tracing::warn!(route = ?route, ip = %client_ip(key), "Admission gate rejected request");
        }
        allowed
    }

    fn prune(&self) {
        self.register.retain_recent();
        self.login.retain_recent();
        self.refresh.retain_recent();
        self.verify.retain_recent();
    }
}

/// Key for routes limited per client and submitted email.
pub fn ip_email_key(ip: &str, email: &str) -> String {
    format!("{ip}|{}", email.trim().to_lowercase())
}

/// Client part of an admission key. Emails stay out of the logs.
fn client_ip(key: &str) -> &str {
    key.split_once('|').map_or(key, |(ip, _)| ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max: u32) -> RateLimits {
        let limit = RateLimit {
            window: Duration::from_secs(600),
            max,
        };
        RateLimits {
            login: limit,
            refresh: limit,
            register: limit,
            verify: limit,
        }
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let gate = RateLimitGate::new(&limits(3));
        for _ in 0..3 {
            assert!(gate.admit(AdmissionRoute::Login, "1.2.3.4|a@x.com"));
        }
        assert!(!gate.admit(AdmissionRoute::Login, "1.2.3.4|a@x.com"));
    }

    #[test]
    fn keys_and_routes_are_independent() {
        let gate = RateLimitGate::new(&limits(1));
        assert!(gate.admit(AdmissionRoute::Login, "1.2.3.4|a@x.com"));
        assert!(!gate.admit(AdmissionRoute::Login, "1.2.3.4|a@x.com"));
        assert!(gate.admit(AdmissionRoute::Login, "1.2.3.4|b@x.com"));
        assert!(gate.admit(AdmissionRoute::Refresh, "1.2.3.4|a@x.com"));
    }

    #[test]
    fn allow_all_admits() {
        for _ in 0..100 {
            assert!(AllowAll.admit(AdmissionRoute::Register, "k"));
        }
    }

    #[test]
    fn logged_key_drops_email() {
        assert_eq!(client_ip(&ip_email_key("1.1.1.1", "a@x.com")), "1.1.1.1");
        assert_eq!(client_ip("2.2.2.2"), "2.2.2.2");
    }

    #[test]
    fn email_key_is_case_insensitive() {
        assert_eq!(ip_email_key("1.1.1.1", " A@X.com "), "1.1.1.1|a@x.com");
    }
}
