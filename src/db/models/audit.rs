//! Audit trail of account and assignment changes.

use serde::Serialize;
use sqlx::SqliteExecutor;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub actor: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// One audit event to record.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry<'a> {
    pub actor: Option<&'a str>,
    pub action: &'a str,
    pub target_type: &'a str,
    pub target_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub details: Option<serde_json::Value>,
}

/// Owned audit event, written on the same connection as the change it
/// describes so both commit or neither does.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor: String,
    pub action: &'static str,
    pub target_type: &'static str,
    pub target_id: String,
    pub ip_address: String,
    pub details: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub async fn write(&self, db: impl SqliteExecutor<'_>) -> Result<(), sqlx::Error> {
        log_audit(
            db,
            &AuditEntry {
                actor: Some(&self.actor),
                action: self.action,
                target_type: self.target_type,
                target_id: Some(&self.target_id),
                ip_address: Some(&self.ip_address),
                details: self.details.clone(),
            },
            &crate::db::now_timestamp(),
        )
        .await
    }
}

/// Common audit action types
pub mod actions {
    pub const USER_REGISTER: &str = "user.register";
    pub const USER_CREATE: &str = "user.create";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_APPROVE: &str = "user.approve";
    pub const USER_REJECT: &str = "user.reject";
    pub const USER_SUSPEND: &str = "user.suspend";
    pub const USER_ACTIVATE: &str = "user.activate";
    pub const USER_RESET_PASSWORD: &str = "user.reset_password";
    pub const USER_DELETE: &str = "user.delete";
    pub const PASSWORD_CHANGE: &str = "auth.password_change";

    pub const ASSIGNMENT_CREATE: &str = "assignment.create";
    pub const ASSIGNMENT_UPDATE: &str = "assignment.update";
    pub const ASSIGNMENT_DELETE: &str = "assignment.delete";

    pub const VEHICLE_STATUS: &str = "vehicle.status";
    pub const VEHICLE_DELETE: &str = "vehicle.delete";
}

/// Common target types
pub mod target_types {
    pub const USER: &str = "user";
    pub const ASSIGNMENT: &str = "assignment";
    pub const VEHICLE: &str = "vehicle";
}

/// Log an audit event to the database
pub async fn log_audit(
    db: impl SqliteExecutor<'_>,
    entry: &AuditEntry<'_>,
    now: &str,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let details_json = entry.details.as_ref().map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, actor, action, target_type, target_id, ip_address, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(entry.actor)
    .bind(entry.action)
    .bind(entry.target_type)
    .bind(entry.target_id)
    .bind(entry.ip_address)
    .bind(&details_json)
    .bind(now)
    .execute(db)
    .await?;

    tracing::debug!(
        action = entry.action,
        target_type = entry.target_type,
        target_id = entry.target_id,
        actor = entry.actor,
        "Audit log recorded"
    );

    Ok(())
}

pub async fn list_recent_audit_logs(
    db: impl SqliteExecutor<'_>,
    limit: i64,
) -> Result<Vec<AuditLog>, sqlx::Error> {
    sqlx::query_as::<_, AuditLog>(
        "SELECT * FROM audit_logs ORDER BY created_at DESC, id LIMIT ?",
    )
    .bind(limit)
    .fetch_all(db)
    .await
}
