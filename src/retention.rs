// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Retention Sweeper
//!
//! Background task that keeps persisted auth state within its horizons.
//!
//! ## Strategy
//!
//! Every `interval` (default 1 h) the sweeper:
//! 1. Deletes audit entries older than the audit retention horizon.
//! 2. Marks `Active` sessions whose `expires_at` has passed as `Expired`.
//! 3. Drops idle keys from the admission gate.
//!
//! Expired refresh records are left in place: they are detected lazily on
//! redemption and still feed reuse detection.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use crate::storage::AuthStore;

/// Default interval between sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub audit_purged: usize,
    pub sessions_expired: usize,
}

pub struct RetentionSweeper {
    store: AuthStore,
    admission: Arc<dyn AdmissionGate>,
    audit_retention: TimeDelta,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(
        store: AuthStore,
        admission: Arc<dyn AdmissionGate>,
        audit_retention: TimeDelta,
    ) -> Self {
        Self {
            store,
            admission,
            audit_retention,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            audit_retention_days = self.audit_retention.num_days(),
            "Retention sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Retention sweeper shutting down");
                return;
            }

            self.sweep_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass. Failures are logged and retried on the next pass.
    pub async fn sweep_once(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let cutoff = now - self.audit_retention;
        match self.store.call(move |db| db.purge_audit_before(cutoff)).await {
            Ok(n) => report.audit_purged = n,
            Err(e) => warn!(error = %e, "Audit purge failed"),
        }

        match self.store.call(move |db| db.expire_stale_sessions(now)).await {
            Ok(n) => report.sessions_expired = n,
            Err(e) => warn!(error = %e, "Session expiry sweep failed"),
        }

        self.admission.prune();

        if report != SweepReport::default() {
            info!(
                audit_purged = report.audit_purged,
                sessions_expired = report.sessions_expired,
                "Retention sweep complete"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AllowAll;
    use crate::storage::database::tests::temp_db;
    use crate::storage::sessions::tests::sample_session;
    use crate::storage::{AuditEvent, AuditEventKind, SessionStatus, SessionWrite};

    #[tokio::test]
    async fn sweep_purges_old_audit_and_expires_sessions() {
        let (db, _dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));

        let mut old = AuditEvent::new(AuditEventKind::LoginFailed).with_user("u1");
        old.created_at = Utc::now() - TimeDelta::days(400);
        store.database().append_audit(&old).unwrap();
        let fresh = AuditEvent::new(AuditEventKind::LoginSuccess).with_user("u1");
        store.database().append_audit(&fresh).unwrap();

        let stale = sample_session("u1", TimeDelta::seconds(-1));
        let live = sample_session("u1", TimeDelta::days(1));
        for s in [&stale, &live] {
            let write = SessionWrite::Create(s.clone());
            let record = crate::storage::RefreshTokenRecord {
                jti: uuid::Uuid::new_v4().to_string(),
                user_id: "u1".into(),
                session_id: s.session_id.clone(),
                token_hash: uuid::Uuid::new_v4().to_string(),
                family_id: uuid::Uuid::new_v4().to_string(),
                parent_token_id: None,
                issued_at: Utc::now(),
                expires_at: Utc::now() + TimeDelta::days(1),
                used_at: None,
                revoked_at: None,
                revoke_reason: None,
                created_by_ip: String::new(),
                created_by_ua: String::new(),
            };
            assert!(store.database().persist_issuance(&write, &record).unwrap());
        }

        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(AllowAll), TimeDelta::days(365));
        let report = sweeper.sweep_once().await;
        assert_eq!(report.audit_purged, 1);
        assert_eq!(report.sessions_expired, 1);

        let remaining = store.database().audit_events_for_user("u1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, AuditEventKind::LoginSuccess);

        let stale = store.database().get_session(&stale.session_id).unwrap().unwrap();
        assert_eq!(stale.status, SessionStatus::Expired);
        let live = store.database().get_session(&live.session_id).unwrap().unwrap();
        assert_eq!(live.status, SessionStatus::Active);

        // Nothing left to do
        assert_eq!(sweeper.sweep_once().await, SweepReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let (db, _dir) = temp_db();
        let store = AuthStore::new(db, Duration::from_secs(5));
        let sweeper = RetentionSweeper::new(store, Arc::new(AllowAll), TimeDelta::days(365))
            .with_interval(Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
