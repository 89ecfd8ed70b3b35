// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Response envelopes.
//!
//! Every response body has the shape `{result, message, data}`; failures add
//! a stable `code` and carry `data: null`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthError;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// Failure envelope.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Always `false`
    pub result: bool,
    /// Stable machine-readable code, e.g. `E_AUTH_INVALID_CREDENTIALS`
    pub code: String,
    pub message: String,
    /// Always `null`
    #[schema(value_type = Option<Object>)]
    pub data: Option<()>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "E_NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "E_BAD_REQUEST", message)
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "E_RATE_LIMIT",
            "Too many requests, please try again later",
        )
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "E_INTERNAL", INTERNAL_MESSAGE)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if let AuthError::Internal(detail) = &err {
            tracing::error!(detail = %detail, "Internal error while handling request");
            return Self::internal();
        }
        Self::new(err.status_code(), err.error_code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            result: false,
            code: self.code.to_string(),
            message: self.message,
            data: None,
        });
        (self.status, body).into_response()
    }
}

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always `true`
    pub result: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            result: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// Success with `data: null`.
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            result: true,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_status_and_code() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.code, "E_NOT_FOUND");
        assert_eq!(nf.message, "missing");

        let limited = ApiError::rate_limited();
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.code, "E_RATE_LIMIT");
    }

    #[tokio::test]
    async fn into_response_returns_failure_envelope() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(
            body,
            r#"{"result":false,"code":"E_BAD_REQUEST","message":"bad data","data":null}"#
        );
    }

    #[test]
    fn auth_error_keeps_status_and_code() {
        let err = ApiError::from(AuthError::RefreshReuseDetected);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, "E_AUTH_REFRESH_REUSE_DETECTED");
    }

    #[test]
    fn internal_auth_error_is_opaque() {
        let err = ApiError::from(AuthError::Internal("signing key missing".into()));
        assert_eq!(err.code, "E_INTERNAL");
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn success_envelope_serializes_null_data() {
        let body = serde_json::to_value(ApiResponse::empty("Logged out")).unwrap();
        assert_eq!(body["result"], true);
        assert_eq!(body["message"], "Logged out");
        assert!(body["data"].is_null());
    }
}
