// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::storage::StoreError;

/// Every failure the authentication engine can report.
///
/// Each variant maps to one HTTP status and one stable machine-readable
/// code. Authentication failures keep their messages generic so a caller
/// cannot tell which factor was wrong.
#[derive(Debug)]
pub enum AuthError {
    /// Email or password missing from a register/login body
    CredentialsRequired,
    /// Email does not look like an address
    InvalidEmail,
    /// Password shorter than the policy minimum
    PasswordTooShort,
    /// Current or new password missing from a change-password body
    PasswordFieldsRequired,
    /// Current password did not match on change-password
    PasswordInvalid,
    /// Unknown or already-consumed verification token
    InvalidVerifyToken,
    /// Email already registered
    DuplicateIdentity,
    /// Unknown email or wrong password
    InvalidCredentials,
    /// Lockout window still running
    AccountLocked,
    /// Email not yet verified
    EmailNotVerified,
    /// Account status forbids sign-in
    AccountNotAllowed,
    /// No refresh secret in cookie or body
    RefreshMissing,
    /// Refresh secret matches no record
    InvalidRefreshToken,
    /// Refresh secret was already used, revoked or expired; family burned
    RefreshReuseDetected,
    /// Lost the race to redeem a refresh secret
    RefreshAlreadyUsed,
    /// Owner of the refresh record may not sign in
    RefreshUserNotAllowed,
    /// Session behind the refresh record is gone
    SessionExpired,
    /// No bearer access token
    MissingCredential,
    /// Access token failed signature or expiry checks
    InvalidToken,
    /// Access token names a user that does not exist
    UserNotFound,
    /// Access token names a user that is not active
    UserInactive,
    /// Access token predates a logout-all or password change
    TokenVersionStale,
    /// Access token names a session that is no longer active
    SessionInactive,
    /// Storage, hashing or signing failure; detail is logged, not returned
    Internal(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::CredentialsRequired => "E_AUTH_MISSING_CREDENTIALS",
            AuthError::InvalidEmail => "E_AUTH_INVALID_EMAIL",
            AuthError::PasswordTooShort => "E_AUTH_PASSWORD_TOO_SHORT",
            AuthError::PasswordFieldsRequired => "E_AUTH_PASSWORD_FIELDS_REQUIRED",
            AuthError::PasswordInvalid => "E_AUTH_PASSWORD_INVALID",
            AuthError::InvalidVerifyToken => "E_AUTH_INVALID_VERIFY_TOKEN",
            AuthError::DuplicateIdentity => "E_AUTH_EMAIL_EXISTS",
            AuthError::InvalidCredentials => "E_AUTH_INVALID_CREDENTIALS",
            AuthError::AccountLocked => "E_AUTH_ACCOUNT_LOCKED",
            AuthError::EmailNotVerified => "E_AUTH_EMAIL_NOT_VERIFIED",
            AuthError::AccountNotAllowed => "E_AUTH_ACCOUNT_NOT_ALLOWED",
            AuthError::RefreshMissing => "E_AUTH_REFRESH_MISSING",
            AuthError::InvalidRefreshToken => "E_AUTH_REFRESH_INVALID",
            AuthError::RefreshReuseDetected => "E_AUTH_REFRESH_REUSE_DETECTED",
            AuthError::RefreshAlreadyUsed => "E_AUTH_REFRESH_ALREADY_USED",
            AuthError::RefreshUserNotAllowed => "E_AUTH_REFRESH_USER_NOT_ALLOWED",
            AuthError::SessionExpired => "E_AUTH_SESSION_EXPIRED",
            AuthError::MissingCredential => "E_AUTH_MISSING_BEARER",
            AuthError::InvalidToken => "E_AUTH_INVALID_TOKEN",
            AuthError::UserNotFound => "E_AUTH_USER_NOT_FOUND",
            AuthError::UserInactive => "E_AUTH_USER_INACTIVE",
            AuthError::TokenVersionStale => "E_AUTH_TOKEN_VERSION_MISMATCH",
            AuthError::SessionInactive => "E_AUTH_SESSION_INACTIVE",
            AuthError::Internal(_) => "E_INTERNAL",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::CredentialsRequired
            | AuthError::InvalidEmail
            | AuthError::PasswordTooShort
            | AuthError::PasswordFieldsRequired
            | AuthError::PasswordInvalid
            | AuthError::InvalidVerifyToken => StatusCode::BAD_REQUEST,
            AuthError::DuplicateIdentity => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::RefreshMissing
            | AuthError::InvalidRefreshToken
            | AuthError::RefreshReuseDetected
            | AuthError::RefreshAlreadyUsed
            | AuthError::SessionExpired
            | AuthError::MissingCredential
            | AuthError::InvalidToken
            | AuthError::UserNotFound
            | AuthError::TokenVersionStale
            | AuthError::SessionInactive => StatusCode::UNAUTHORIZED,
            AuthError::EmailNotVerified
            | AuthError::AccountNotAllowed
            | AuthError::RefreshUserNotAllowed
            | AuthError::UserInactive => StatusCode::FORBIDDEN,
            AuthError::AccountLocked => StatusCode::LOCKED,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Failures after which the client's refresh cookie must be dropped.
    pub fn clears_refresh_cookie(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshReuseDetected
                | AuthError::RefreshAlreadyUsed
                | AuthError::RefreshUserNotAllowed
                | AuthError::SessionExpired
        )
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::CredentialsRequired => write!(f, "Email and password are required"),
            AuthError::InvalidEmail => write!(f, "Email is invalid"),
            AuthError::PasswordTooShort => {
                write!(f, "Password must be at least 8 characters")
            }
            AuthError::PasswordFieldsRequired => {
                write!(f, "Current and new password are required")
            }
            AuthError::PasswordInvalid => write!(f, "Current password is incorrect"),
            AuthError::InvalidVerifyToken => write!(f, "Invalid or expired token"),
            AuthError::DuplicateIdentity => write!(f, "Email already exists"),
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::AccountLocked => write!(f, "Account is temporarily locked"),
            AuthError::EmailNotVerified => write!(f, "Email is not verified"),
            AuthError::AccountNotAllowed => write!(f, "Account is not allowed to sign in"),
            AuthError::RefreshMissing => write!(f, "Refresh token is required"),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            AuthError::RefreshReuseDetected => write!(f, "Refresh token is no longer valid"),
            AuthError::RefreshAlreadyUsed => write!(f, "Refresh token already used"),
            AuthError::RefreshUserNotAllowed => {
                write!(f, "User is not allowed to refresh token")
            }
            AuthError::SessionExpired => write!(f, "Session expired"),
            AuthError::MissingCredential => write!(f, "Unauthorized"),
            AuthError::InvalidToken => write!(f, "Invalid or expired access token"),
            AuthError::UserNotFound => write!(f, "User not found"),
            AuthError::UserInactive => write!(f, "User is not active"),
            AuthError::TokenVersionStale => {
                write!(f, "Token is expired. Please sign in again.")
            }
            AuthError::SessionInactive => write!(f, "Session is not active"),
            AuthError::Internal(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Credential store failure");
        AuthError::Internal(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
