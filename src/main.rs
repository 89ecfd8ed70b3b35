// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use sessionkeep::{
    admission::{AdmissionGate, RateLimitGate},
    api::router,
    config::{AuthConfig, LOG_FORMAT_ENV},
    mail::LogMailer,
    retention::RetentionSweeper,
    state::AppState,
    storage::AuthStore,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            for problem in &e.0 {
                error!(problem = %problem, "Invalid configuration");
            }
            return ExitCode::FAILURE;
        }
    };

    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "Invalid bind address");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(error = %e, path = %config.data_dir.display(), "Cannot create data directory");
        return ExitCode::FAILURE;
    }
    let store = match AuthStore::open(&config.database_path(), config.store_timeout) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, path = %config.database_path().display(), "Cannot open database");
            return ExitCode::FAILURE;
        }
    };

    let admission: Arc<dyn AdmissionGate> = Arc::new(RateLimitGate::new(&config.rate_limits));
    let audit_retention = config.audit_retention;
    let production = config.production;

    let state = match AppState::new(config, store.clone(), Arc::new(LogMailer), admission.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Failed to initialise auth engine");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let sweeper = RetentionSweeper::new(store, admission, audit_retention);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, production, "Sessionkeep listening (docs at /docs)");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Gracefully shutting down");
        })
        .await;

    shutdown.cancel();
    let _ = sweeper_handle.await;

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
