// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client/device metadata recorded on sessions, refresh records and audit
//! entries.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Who is calling, as far as the request tells us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    /// First `X-Forwarded-For` hop, else the peer address, else empty
    pub ip: String,
    /// `User-Agent`, empty when absent
    pub user_agent: String,
    /// `X-Device-Id`, when the client sends one
    pub device_id: Option<String>,
}

impl ClientContext {
    pub fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = match forwarded {
            Some(ip) => ip.to_string(),
            None => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
        };

        Self {
            ip,
            user_agent: header_string(headers, USER_AGENT.as_str()).unwrap_or_default(),
            device_id: header_string(headers, DEVICE_ID_HEADER),
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_headers(&parts.headers, peer))
    }
}
