// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sessionkeep::admission::{AdmissionGate, AllowAll};
use sessionkeep::config::AuthConfig;
use sessionkeep::context::ClientContext;
use sessionkeep::engine::AuthEngine;
use sessionkeep::mail::MemoryMailer;
use sessionkeep::state::AppState;
use sessionkeep::storage::{AuthStore, UserRecord};
use tempfile::TempDir;

pub const PASSWORD: &str = "correct-horse-battery";

pub fn config_with(extra: &[(&str, &str)]) -> AuthConfig {
    let extra: Vec<(String, String)> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AuthConfig::from_lookup(move |name| {
        if let Some((_, v)) = extra.iter().find(|(k, _)| k == name) {
            return Some(v.clone());
        }
        match name {
            "JWT_SECRET" => Some("integration-secret-at-least-32-characters".to_string()),
            "PASSWORD_HASH_MEMORY_KIB" => Some("1024".to_string()),
            "PASSWORD_HASH_ITERATIONS" => Some("1".to_string()),
            _ => None,
        }
    })
    .expect("test config")
}

pub struct Harness {
    pub state: AppState,
    pub mailer: Arc<MemoryMailer>,
    pub store: AuthStore,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(config_with(&[]), Arc::new(AllowAll))
    }

    pub fn with(config: AuthConfig, admission: Arc<dyn AdmissionGate>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store =
            AuthStore::open(&dir.path().join("auth.redb"), Duration::from_secs(5)).expect("store");
        let mailer = Arc::new(MemoryMailer::new());
        let state = AppState::new(config, store.clone(), mailer.clone(), admission).expect("state");
        Self {
            state,
            mailer,
            store,
            _dir: dir,
        }
    }

    pub fn engine(&self) -> &AuthEngine {
        &self.state.engine
    }

    /// Token from the last verification link mailed to `email`.
    pub fn verify_token_for(&self, email: &str) -> String {
        let link = self.mailer.last_link_for(email).expect("verification mail");
        link.path_segments()
            .and_then(|mut segments| segments.next_back())
            .expect("token segment")
            .to_string()
    }

    /// Register and verify an account with [`PASSWORD`].
    pub async fn verified_user(&self, email: &str) -> UserRecord {
        let client = ClientContext::default();
        self.engine()
            .register(email, PASSWORD, "Test User", &client)
            .await
            .expect("register");
        let token = self.verify_token_for(&email.trim().to_lowercase());
        self.engine()
            .verify_email(&token, &client)
            .await
            .expect("verify")
    }
}

pub fn client(ip: &str) -> ClientContext {
    ClientContext {
        ip: ip.to_string(),
        user_agent: "integration-test".to_string(),
        device_id: None,
    }
}
