//! Login attempt log used for lockout decisions.

use sqlx::SqliteExecutor;

/// Record an attempt as failed and return its id so it can be upgraded later.
pub async fn record_attempt(
    db: impl SqliteExecutor<'_>,
    username: &str,
    ip_address: &str,
    user_agent: &str,
    at: &str,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO login_attempts (username, ip_address, success, attempted_at, user_agent)
        VALUES (?, ?, 0, ?, ?)
        "#,
    )
    .bind(username)
    .bind(ip_address)
    .bind(at)
    .bind(user_agent)
    .execute(db)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn mark_success(db: impl SqliteExecutor<'_>, attempt_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE login_attempts SET success = 1 WHERE id = ?")
        .bind(attempt_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Success flags of the most recent attempts for `username` or `ip_address`
/// made at or after `since`, newest first, excluding `exclude_id`.
pub async fn recent_outcomes(
    db: impl SqliteExecutor<'_>,
    username: &str,
    ip_address: &str,
    since: &str,
    exclude_id: i64,
    limit: u32,
) -> Result<Vec<bool>, sqlx::Error> {
    let rows: Vec<(bool,)> = sqlx::query_as(
        r#"
        SELECT success FROM login_attempts
        WHERE (username = ? OR ip_address = ?)
          AND attempted_at >= ?
          AND id != ?
        ORDER BY attempted_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(username)
    .bind(ip_address)
    .bind(since)
    .bind(exclude_id)
    .bind(i64::from(limit))
    .fetch_all(db)
    .await?;
    Ok(rows.into_iter().map(|(success,)| success).collect())
}

pub async fn purge_before(db: impl SqliteExecutor<'_>, cutoff: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM login_attempts WHERE attempted_at < ?")
        .bind(cutoff)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}
