//! Background removal of expired sessions and stale login attempts.

use std::time::Duration;
use tracing::{debug, warn};

use super::{AuthService, SessionManager};

/// Ten years; keeps the retention within chrono's range.
const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 3600;

/// Run one sweep. Failures are logged and retried on the next tick.
pub async fn sweep_once(
    sessions: &SessionManager,
    auth: &AuthService,
    retention: chrono::Duration,
) {
    match sessions.sweep().await {
        Ok(removed) => debug!(removed, "Expired sessions swept"),
        Err(e) => warn!(error = %e, "Session sweep failed"),
    }
    match auth.purge_attempts(retention).await {
        Ok(removed) => debug!(removed, "Old login attempts purged"),
        Err(e) => warn!(error = %e, "Login attempt purge failed"),
    }
}

pub fn spawn_sweeper(
    sessions: SessionManager,
    auth: AuthService,
    interval_secs: u64,
    retention_secs: u64,
) {
    let retention = chrono::Duration::seconds(retention_secs.min(MAX_RETENTION_SECS) as i64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            sweep_once(&sessions, &auth, retention).await;
        }
    });
}
