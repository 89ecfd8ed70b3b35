// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Auth endpoints under `/api/authen`.
//!
//! Every body is wrapped in the `{result, message, data}` envelope. The
//! refresh secret travels in the refresh cookie; clients that send
//! `X-Refresh-Transport: body` also get it in `data.refreshToken` and may
//! post it back in the body.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;

use crate::admission::{ip_email_key, AdmissionRoute};
use crate::auth::{Auth, AuthError};
use crate::context::ClientContext;
use crate::engine::IssuedSession;
use crate::error::{ApiError, ApiResponse, ErrorBody};
use crate::models::{
    ChangePasswordRequest, CurrentUser, LoginData, LoginRequest, RefreshData, RefreshRequest,
    RegisterData, RegisterRequest, UserSummary, TOKEN_TYPE_BEARER,
};
use crate::state::AppState;

/// Header a client sets to receive the refresh secret in the body.
pub const REFRESH_TRANSPORT_HEADER: &str = "x-refresh-transport";

fn wants_body_transport(headers: &HeaderMap) -> bool {
    headers
        .get(REFRESH_TRANSPORT_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("body"))
}

/// A body without a JSON content type counts as empty; a malformed one is a
/// 400.
fn json_body<T: Default>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
    }
}

fn admit(
    state: &AppState,
    route: AdmissionRoute,
    key: &str,
) -> Result<(), ApiError> {
    if state.admission.admit(route, key) {
        Ok(())
    } else {
        Err(ApiError::rate_limited())
    }
}

/// Error response, clearing the refresh cookie where the failure means the
/// presented secret is dead.
fn failure(state: &AppState, jar: CookieJar, err: AuthError) -> Response {
    if err.clears_refresh_cookie() {
        (state.cookies.clear(jar), ApiError::from(err)).into_response()
    } else {
        ApiError::from(err).into_response()
    }
}

fn refresh_in_body(issued: &IssuedSession, headers: &HeaderMap) -> Option<String> {
    wants_body_transport(headers).then(|| issued.refresh_secret.clone())
}

/// Register a new account.
///
/// Sends a verification link to the address; the account cannot sign in
/// until it is followed.
#[utoipa::path(
    post,
    path = "/api/authen/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered; data is RegisterData", body = RegisterData),
        (status = 400, description = "Missing or invalid input", body = ErrorBody),
        (status = 409, description = "Email already exists", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    client: ClientContext,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<RegisterData>>), ApiError> {
    let body = json_body(payload)?;
    let email = body.email.unwrap_or_default();
    admit(&state, AdmissionRoute::Register, &ip_email_key(&client.ip, &email))?;

    let user = state
        .engine
        .register(
            &email,
            body.password.as_deref().unwrap_or_default(),
            body.display_name.as_deref().unwrap_or_default(),
            &client,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(
            "Register successful. Please verify your email.",
            RegisterData {
                user_id: user.id,
                email: user.email,
            },
        )),
    ))
}

/// Follow an email verification link.
#[utoipa::path(
    get,
    path = "/api/authen/vf/{token}",
    tag = "Auth",
    params(("token" = String, Path, description = "Verification token from the email")),
    responses(
        (status = 200, description = "Email verified"),
        (status = 400, description = "Invalid or expired token", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
    )
)]
pub async fn verify_email(
    State(state): State<AppState>,
    client: ClientContext,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    admit(&state, AdmissionRoute::Verify, &client.ip)?;
    state.engine.verify_email(&token, &client).await?;
    Ok(Json(ApiResponse::empty("Email verified successfully")))
}

/// Sign in with email and password.
#[utoipa::path(
    post,
    path = "/api/authen/login",
    tag = "Auth",
    request_body = LoginRequest,
    params(("X-Refresh-Transport" = Option<String>, Header, description = "`body` to also return the refresh secret in the body")),
    responses(
        (status = 200, description = "Signed in; data is LoginData, refresh cookie set", body = LoginData),
        (status = 400, description = "Missing credentials", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Email not verified or account not allowed", body = ErrorBody),
        (status = 423, description = "Account temporarily locked", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    headers: HeaderMap,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<ApiResponse<LoginData>>), ApiError> {
    let body = json_body(payload)?;
    let email = body.email.unwrap_or_default();
    admit(&state, AdmissionRoute::Login, &ip_email_key(&client.ip, &email))?;

    let outcome = state
        .engine
        .login(&email, body.password.as_deref().unwrap_or_default(), &client)
        .await?;
    let issued = outcome.issued;

    let data = LoginData {
        refresh_token: refresh_in_body(&issued, &headers),
        access_token: issued.access_token.clone(),
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: issued.expires_in,
        session_id: issued.session_id.clone(),
        user: UserSummary::from(&outcome.user),
    };
    let jar = state
        .cookies
        .set(jar, &issued.refresh_secret, issued.refresh_expires_at);

    Ok((jar, Json(ApiResponse::ok("Login successful", data))))
}

/// Trade a refresh secret for a new access/refresh pair.
///
/// The cookie wins over the body. Replaying a used secret revokes the whole
/// session.
#[utoipa::path(
    post,
    path = "/api/authen/rf",
    tag = "Auth",
    request_body(content = RefreshRequest, description = "Only needed without the cookie"),
    params(("X-Refresh-Transport" = Option<String>, Header, description = "`body` to also return the refresh secret in the body")),
    responses(
        (status = 200, description = "Rotated; data is RefreshData, refresh cookie replaced", body = RefreshData),
        (status = 401, description = "Missing, invalid, reused or expired refresh secret", body = ErrorBody),
        (status = 403, description = "User may not refresh", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    headers: HeaderMap,
    jar: CookieJar,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Response {
    if let Err(e) = admit(&state, AdmissionRoute::Refresh, &client.ip) {
        return e.into_response();
    }

    let secret = match state.cookies.read(&jar) {
        Some(secret) => secret,
        None => match json_body(payload) {
            Ok(body) => body.refresh_token.unwrap_or_default(),
            Err(e) => return e.into_response(),
        },
    };

    let issued = match state.engine.refresh(&secret, &client).await {
        Ok(issued) => issued,
        Err(err) => return failure(&state, jar, err),
    };

    let data = RefreshData {
        refresh_token: refresh_in_body(&issued, &headers),
        access_token: issued.access_token.clone(),
        token_type: TOKEN_TYPE_BEARER.to_string(),
        expires_in: issued.expires_in,
        session_id: issued.session_id.clone(),
    };
    let jar = state
        .cookies
        .set(jar, &issued.refresh_secret, issued.refresh_expires_at);

    (jar, Json(ApiResponse::ok("Token refreshed", data))).into_response()
}

/// Sign out the current device.
#[utoipa::path(
    post,
    path = "/api/authen/logout",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Logged out, refresh cookie cleared"),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientContext,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    state.engine.logout(&user, &client).await?;
    Ok((state.cookies.clear(jar), Json(ApiResponse::empty("Logged out"))))
}

/// Sign out every device and invalidate all outstanding access tokens.
#[utoipa::path(
    post,
    path = "/api/authen/loa",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Logged out everywhere, refresh cookie cleared"),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientContext,
    jar: CookieJar,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    state.engine.logout_all(&user, &client).await?;
    Ok((
        state.cookies.clear(jar),
        Json(ApiResponse::empty("Logged out from all devices")),
    ))
}

/// Change the password. Signs out every device.
#[utoipa::path(
    post,
    path = "/api/authen/cpw",
    tag = "Auth",
    security(("bearer" = [])),
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, refresh cookie cleared"),
        (status = 400, description = "Missing fields, short or wrong password", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
    )
)]
pub async fn change_password(
    State(state): State<AppState>,
    Auth(user): Auth,
    client: ClientContext,
    jar: CookieJar,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<ApiResponse<()>>), ApiError> {
    let body = json_body(payload)?;
    state
        .engine
        .change_password(
            &user,
            body.current_password.as_deref().unwrap_or_default(),
            body.new_password.as_deref().unwrap_or_default(),
            &client,
        )
        .await?;
    Ok((
        state.cookies.clear(jar),
        Json(ApiResponse::empty("Password changed. Please login again.")),
    ))
}

/// Profile of the signed-in user.
#[utoipa::path(
    get,
    path = "/api/authen/me",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Current user; data is CurrentUser", body = CurrentUser),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "User inactive", body = ErrorBody),
    )
)]
pub async fn me(
    State(state): State<AppState>,
    Auth(user): Auth,
) -> Json<ApiResponse<CurrentUser>> {
    Json(ApiResponse::ok(
        "Current user loaded",
        state.engine.current_user(&user),
    ))
}
