// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{MatchedPath, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info_span, Span};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::middleware::require_auth,
    auth::Role,
    context::DEVICE_ID_HEADER,
    error::{ApiError, ErrorBody},
    models::{
        ChangePasswordRequest, CurrentUser, LoginData, LoginRequest, RefreshData,
        RefreshRequest, RegisterData, RegisterRequest, UserSummary,
    },
    state::AppState,
    storage::UserStatus,
};

pub mod auth;
pub mod health;

/// Prefix of every auth route.
pub const AUTH_PREFIX: &str = "/api/authen";

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/register", post(auth::register))
        .route("/vf/{token}", get(auth::verify_email))
        .route("/login", post(auth::login))
        .route("/rf", post(auth::refresh));

    let protected = Router::new()
        .route("/logout", post(auth::logout))
        .route("/loa", post(auth::logout_all))
        .route("/cpw", post(auth::change_password))
        .route("/me", get(auth::me))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let cors = cors_layer(&state);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest(AUTH_PREFIX, public.merge(protected))
        .fallback(not_found)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        )
}

async fn not_found() -> impl IntoResponse {
    ApiError::not_found("Route not found")
}

/// Credentialed CORS for the configured client origin only.
fn cors_layer(state: &AppState) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(auth::REFRESH_TRANSPORT_HEADER),
            HeaderName::from_static(DEVICE_ID_HEADER),
        ])
        .allow_credentials(true);

    let origin = state.config.client_url.origin().ascii_serialization();
    match HeaderValue::from_str(&origin) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(e) => {
            tracing::warn!(origin = %origin, error = %e, "Client origin unusable for CORS");
            layer
        }
    }
}

fn make_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sessionkeep API",
        description = "Password sign-in, access tokens, refresh-token rotation and device sessions."
    ),
    paths(
        health::health,
        health::liveness,
        health::readiness,
        auth::register,
        auth::verify_email,
        auth::login,
        auth::refresh,
        auth::logout,
        auth::logout_all,
        auth::change_password,
        auth::me
    ),
    components(
        schemas(
            ErrorBody,
            RegisterRequest,
            LoginRequest,
            RefreshRequest,
            ChangePasswordRequest,
            RegisterData,
            LoginData,
            RefreshData,
            UserSummary,
            CurrentUser,
            Role,
            UserStatus
        )
    ),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Auth", description = "Registration, sign-in, token rotation and sign-out")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            )
        }
    }
}
