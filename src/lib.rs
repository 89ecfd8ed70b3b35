// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sessionkeep - Credential and Session Lifecycle Service
//!
//! Password sign-in with short-lived access tokens, single-use refresh
//! secrets rotated within a family, multi-device sessions, forced global
//! sign-out and a security audit trail, backed by an embedded redb store.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Token, password and cookie primitives plus the request gate
//! - `engine` - Credential store, token issuer and refresh ledger
//! - `storage` - Persistent records (redb)
//! - `retention` - Background audit purge and session expiry

pub mod admission;
pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod mail;
pub mod models;
pub mod retention;
pub mod state;
pub mod storage;
