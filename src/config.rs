// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! validated [`AuthConfig`] loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `JWT_SECRET` | HS256 signing secret, at least 32 characters | Required |
//! | `JWT_EXPIRES_IN` | Access-token lifetime | `15m` |
//! | `REFRESH_TOKEN_EXPIRES_IN` | Refresh-record lifetime | `7d` |
//! | `SESSION_EXPIRES_IN_DAYS` | Session lifetime, re-extended on rotation | `30` |
//! | `REFRESH_TOKEN_PEPPER` | HMAC key for secret hashing | `JWT_SECRET`; required in production |
//! | `REFRESH_COOKIE_NAME` | Refresh cookie name | `refreshToken` |
//! | `AUTH_COOKIE_PATH` | Refresh cookie path | `/api/authen` |
//! | `APP_ENV` | `production` enables `Secure` cookies | `development` |
//! | `CLIENT_URL` | Base URL for verification links | `http://localhost:5173` |
//! | `DATA_DIR` | Directory holding `auth.redb` | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `STORE_TIMEOUT_MS` | Per-call store timeout | `5000` |
//! | `PASSWORD_HASH_MEMORY_KIB` | Argon2id memory cost | `19456` |
//! | `PASSWORD_HASH_ITERATIONS` | Argon2id time cost | `2` |
//! | `AUDIT_RETENTION_DAYS` | Audit horizon | `365` |
//! | `<ROUTE>_RATE_LIMIT_WINDOW_MS` | Admission window (LOGIN, REFRESH, REGISTER, VERIFY) | 10m, 5m, 10m, 10m |
//! | `<ROUTE>_RATE_LIMIT_MAX` | Admissions per window | 10, 30, 5, 30 |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//!
//! Durations accept plain milliseconds or `<n>s`, `<n>m`, `<n>h`, `<n>d`.
//! Unparsable durations fall back to the default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use url::Url;

pub const JWT_SECRET_ENV: &str = "JWT_SECRET";
pub const JWT_EXPIRES_IN_ENV: &str = "JWT_EXPIRES_IN";
pub const REFRESH_TOKEN_EXPIRES_IN_ENV: &str = "REFRESH_TOKEN_EXPIRES_IN";
pub const SESSION_EXPIRES_IN_DAYS_ENV: &str = "SESSION_EXPIRES_IN_DAYS";
pub const REFRESH_TOKEN_PEPPER_ENV: &str = "REFRESH_TOKEN_PEPPER";
pub const REFRESH_COOKIE_NAME_ENV: &str = "REFRESH_COOKIE_NAME";
pub const AUTH_COOKIE_PATH_ENV: &str = "AUTH_COOKIE_PATH";
pub const APP_ENV_ENV: &str = "APP_ENV";
pub const CLIENT_URL_ENV: &str = "CLIENT_URL";

/// Environment variable name for the data directory path.
///
/// # Default
/// `./data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const STORE_TIMEOUT_MS_ENV: &str = "STORE_TIMEOUT_MS";
pub const PASSWORD_HASH_MEMORY_KIB_ENV: &str = "PASSWORD_HASH_MEMORY_KIB";
pub const PASSWORD_HASH_ITERATIONS_ENV: &str = "PASSWORD_HASH_ITERATIONS";
pub const AUDIT_RETENTION_DAYS_ENV: &str = "AUDIT_RETENTION_DAYS";

/// Logging format switch, read by `main`.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Minimum accepted `JWT_SECRET` length.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// File name of the database inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "auth.redb";

const DEFAULT_ACCESS_TTL: TimeDelta = TimeDelta::minutes(15);
const DEFAULT_REFRESH_TTL: TimeDelta = TimeDelta::days(7);
const DEFAULT_SESSION_DAYS: i64 = 30;
const DEFAULT_COOKIE_NAME: &str = "refreshToken";
const DEFAULT_COOKIE_PATH: &str = "/api/authen";
const DEFAULT_CLIENT_URL: &str = "http://localhost:5173";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_HASH_MEMORY_KIB: u32 = 19456;
const DEFAULT_HASH_ITERATIONS: u32 = 2;
const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 365;

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {}", .0.join("; "))]
pub struct ConfigError(pub Vec<String>);

/// Admission quota for one route family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub login: RateLimit,
    pub refresh: RateLimit,
    pub register: RateLimit,
    pub verify: RateLimit,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: RateLimit {
                window: Duration::from_secs(10 * 60),
                max: 10,
            },
            refresh: RateLimit {
                window: Duration::from_secs(5 * 60),
                max: 30,
            },
            register: RateLimit {
                window: Duration::from_secs(10 * 60),
                max: 5,
            },
            verify: RateLimit {
                window: Duration::from_secs(10 * 60),
                max: 30,
            },
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_ttl: TimeDelta,
    pub refresh_ttl: TimeDelta,
    pub session_ttl: TimeDelta,
    pub refresh_pepper: String,
    pub cookie_name: String,
    pub cookie_path: String,
    pub production: bool,
    pub client_url: Url,
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub store_timeout: Duration,
    pub password_memory_kib: u32,
    pub password_iterations: u32,
    pub audit_retention: TimeDelta,
    pub rate_limits: RateLimits,
}

impl AuthConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any key/value source. Collects every problem before failing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut problems = Vec::new();

        let jwt_secret = get(JWT_SECRET_ENV).unwrap_or_default();
        if jwt_secret.chars().count() < MIN_JWT_SECRET_LEN {
            problems.push(format!(
                "{JWT_SECRET_ENV} must be set and at least {MIN_JWT_SECRET_LEN} characters"
            ));
        }

        let production = get(APP_ENV_ENV).is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let refresh_pepper = match get(REFRESH_TOKEN_PEPPER_ENV) {
            Some(pepper) => pepper,
            None => {
                if production {
                    problems.push(format!("{REFRESH_TOKEN_PEPPER_ENV} is required in production"));
                }
                jwt_secret.clone()
            }
        };

        let client_url_raw = get(CLIENT_URL_ENV).unwrap_or_else(|| DEFAULT_CLIENT_URL.to_string());
        let client_url = Url::parse(&client_url_raw)
            .map_err(|e| problems.push(format!("{CLIENT_URL_ENV} is not a valid URL: {e}")))
            .ok();

        let session_days = parse_number(&get, SESSION_EXPIRES_IN_DAYS_ENV, DEFAULT_SESSION_DAYS, &mut problems);
        let port = parse_number(&get, PORT_ENV, DEFAULT_PORT, &mut problems);
        let store_timeout_ms =
            parse_number(&get, STORE_TIMEOUT_MS_ENV, DEFAULT_STORE_TIMEOUT_MS, &mut problems);
        let password_memory_kib = parse_number(
            &get,
            PASSWORD_HASH_MEMORY_KIB_ENV,
            DEFAULT_HASH_MEMORY_KIB,
            &mut problems,
        );
        let password_iterations = parse_number(
            &get,
            PASSWORD_HASH_ITERATIONS_ENV,
            DEFAULT_HASH_ITERATIONS,
            &mut problems,
        );
        let audit_days = parse_number(
            &get,
            AUDIT_RETENTION_DAYS_ENV,
            DEFAULT_AUDIT_RETENTION_DAYS,
            &mut problems,
        );

        let defaults = RateLimits::default();
        let rate_limits = RateLimits {
            login: parse_rate_limit(&get, "LOGIN", defaults.login, &mut problems),
            refresh: parse_rate_limit(&get, "REFRESH", defaults.refresh, &mut problems),
            register: parse_rate_limit(&get, "REGISTER", defaults.register, &mut problems),
            verify: parse_rate_limit(&get, "VERIFY", defaults.verify, &mut problems),
        };

        let client_url = match client_url {
            Some(url) if problems.is_empty() => url,
            _ => return Err(ConfigError(problems)),
        };

        Ok(Self {
            jwt_secret,
            access_ttl: parse_duration(get(JWT_EXPIRES_IN_ENV).as_deref(), DEFAULT_ACCESS_TTL),
            refresh_ttl: parse_duration(
                get(REFRESH_TOKEN_EXPIRES_IN_ENV).as_deref(),
                DEFAULT_REFRESH_TTL,
            ),
            session_ttl: TimeDelta::try_days(session_days)
                .unwrap_or(TimeDelta::days(DEFAULT_SESSION_DAYS)),
            refresh_pepper,
            cookie_name: get(REFRESH_COOKIE_NAME_ENV)
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            cookie_path: get(AUTH_COOKIE_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_COOKIE_PATH.to_string()),
            production,
            client_url,
            data_dir: PathBuf::from(get(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            host: get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            store_timeout: Duration::from_millis(store_timeout_ms),
            password_memory_kib,
            password_iterations,
            audit_retention: TimeDelta::try_days(audit_days)
                .unwrap_or(TimeDelta::days(DEFAULT_AUDIT_RETENTION_DAYS)),
            rate_limits,
        })
    }

    /// Path of the redb file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError(vec![format!("{HOST_ENV}/{PORT_ENV}: {e}")]))
    }
}

/// Parse `<ms>` or `<n>[smhd]`; anything else (or zero) yields `default`.
pub fn parse_duration(input: Option<&str>, default: TimeDelta) -> TimeDelta {
    let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };

    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .filter(|ms| *ms > 0)
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(default);
    }

    let Some((unit_at, unit)) = raw.char_indices().last() else {
        return default;
    };
    let digits = &raw[..unit_at];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return default;
    }
    let Ok(value) = digits.parse::<i64>() else {
        return default;
    };
    if value == 0 {
        return default;
    }
    let parsed = match unit.to_ascii_lowercase() {
        's' => TimeDelta::try_seconds(value),
        'm' => TimeDelta::try_minutes(value),
        'h' => TimeDelta::try_hours(value),
        'd' => TimeDelta::try_days(value),
        _ => None,
    };
    parsed.unwrap_or(default)
}

fn parse_number<T, G>(get: &G, name: &str, default: T, problems: &mut Vec<String>) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(value) if value > T::default() => value,
            _ => {
                problems.push(format!("{name} must be a positive number, got {raw:?}"));
                default
            }
        },
    }
}

fn parse_rate_limit<G>(get: &G, route: &str, default: RateLimit, problems: &mut Vec<String>) -> RateLimit
where
    G: Fn(&str) -> Option<String>,
{
    let window_name = format!("{route}_RATE_LIMIT_WINDOW_MS");
    let max_name = format!("{route}_RATE_LIMIT_MAX");

    let default_window = TimeDelta::from_std(default.window).unwrap_or(TimeDelta::minutes(10));
    let window = parse_duration(get(&window_name).as_deref(), default_window)
        .to_std()
        .unwrap_or(default.window);

    RateLimit {
        window,
        max: parse_number(get, &max_name, default.max, problems),
    }
}
