// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::admission::AdmissionGate;
use crate::auth::{AuthError, RefreshCookie};
use crate::config::AuthConfig;
use crate::engine::AuthEngine;
use crate::mail::Mailer;
use crate::storage::AuthStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AuthEngine>,
    pub config: Arc<AuthConfig>,
    pub admission: Arc<dyn AdmissionGate>,
    pub cookies: RefreshCookie,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        store: AuthStore,
        mailer: Arc<dyn Mailer>,
        admission: Arc<dyn AdmissionGate>,
    ) -> Result<Self, AuthError> {
        let engine = AuthEngine::new(&config, store, mailer)?;
        let cookies = RefreshCookie::new(
            config.cookie_name.clone(),
            config.cookie_path.clone(),
            config.production,
        );
        Ok(Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
            admission,
            cookies,
        })
    }
}
